//! Release 0.16.0: `let` / `var` declarations, compound assignment and a
//! renamed error family.

use indexmap::IndexMap;
use thiserror::Error;

use super::error::{EngineError, ErrorKind};
use super::interpreter::{self, Completion, Hooks};
use super::parser::parse_program;
use super::{Dialect, Event, Limits, Node, Value};

/// Release identifier.
pub const VERSION: &str = "0.16.0";

/// Every error raised by this release.
#[derive(Debug, Clone, Error)]
pub enum AiScriptError {
    /// Parse failure.
    #[error("Syntax: {0}")]
    AiScriptSyntaxError(EngineError),
    /// Type mismatch.
    #[error("Type: {0}")]
    AiScriptTypeError(EngineError),
    /// Generic evaluation failure.
    #[error("Runtime: {0}")]
    AiScriptRuntimeError(EngineError),
    /// Out of bounds access.
    #[error("Index out of range: {0}")]
    AiScriptIndexOutOfRangeError(EngineError),
    /// Raised by the program itself.
    #[error("User: {0}")]
    AiScriptUserError(EngineError),
}

impl AiScriptError {
    /// Underlying message and position.
    pub fn info(&self) -> &EngineError {
        match self {
            AiScriptError::AiScriptSyntaxError(info)
            | AiScriptError::AiScriptTypeError(info)
            | AiScriptError::AiScriptRuntimeError(info)
            | AiScriptError::AiScriptIndexOutOfRangeError(info)
            | AiScriptError::AiScriptUserError(info) => info,
        }
    }
}

impl From<EngineError> for AiScriptError {
    fn from(err: EngineError) -> Self {
        match err.kind {
            ErrorKind::Syntax => AiScriptError::AiScriptSyntaxError(err),
            ErrorKind::Type => AiScriptError::AiScriptTypeError(err),
            ErrorKind::Runtime => AiScriptError::AiScriptRuntimeError(err),
            ErrorKind::IndexOutOfRange => AiScriptError::AiScriptIndexOutOfRangeError(err),
            ErrorKind::User => AiScriptError::AiScriptUserError(err),
        }
    }
}

/// Parser for the modern dialect.
#[derive(Debug, Default)]
pub struct Parser {
    _private: (),
}

impl Parser {
    /// Create a parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whole program.
    pub fn parse(&self, source: &str) -> Result<Vec<Node>, AiScriptError> {
        Ok(parse_program(source, Dialect::Modern)?)
    }
}

/// Hooks and limits for [`Interpreter::new`].
pub struct InterpreterOpts {
    /// Called for every `<:` / `print`.
    pub out: Box<dyn Fn(Value) + Send + Sync>,
    /// Called on lifecycle events.
    pub log: Box<dyn Fn(Event) + Send + Sync>,
    /// Statement budget per execution.
    pub max_step: Option<u64>,
    /// Call nesting limit.
    pub max_call_depth: usize,
    /// Scheduler yield period, in steps.
    pub yield_interval: u64,
}

impl Default for InterpreterOpts {
    fn default() -> Self {
        let Limits {
            max_step,
            max_call_depth,
            yield_interval,
        } = Limits::default();
        Self {
            out: Box::new(|_| {}),
            log: Box::new(|_| {}),
            max_step,
            max_call_depth,
            yield_interval,
        }
    }
}

/// Result of [`Interpreter::exec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Ran to completion.
    Finished,
    /// Stopped by [`Interpreter::abort`].
    Stopped,
}

/// Interpreter for parsed 0.16.0 programs.
pub struct Interpreter {
    inner: interpreter::Interpreter,
}

impl Interpreter {
    /// Create an interpreter with `consts` bound as global constants.
    pub fn new(consts: IndexMap<String, Value>, opts: InterpreterOpts) -> Self {
        let limits = Limits {
            max_step: opts.max_step,
            max_call_depth: opts.max_call_depth,
            yield_interval: opts.yield_interval,
        };
        let hooks = Hooks {
            out: opts.out,
            log: opts.log,
        };
        Self {
            inner: interpreter::Interpreter::new(consts, hooks, limits),
        }
    }

    /// Execute a program.
    pub async fn exec(&self, script: &[Node]) -> Result<ExecStatus, AiScriptError> {
        match self.inner.exec(script).await? {
            Completion::Finished(_) => Ok(ExecStatus::Finished),
            Completion::Aborted => Ok(ExecStatus::Stopped),
        }
    }

    /// Evaluate the `###` blocks of a program.
    pub fn collect_metadata(script: &[Node]) -> Option<IndexMap<Option<String>, Value>> {
        interpreter::Interpreter::collect_metadata(script)
    }

    /// Abort the running program and any later ones.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Statements executed by the current or most recent run.
    pub(crate) fn steps(&self) -> u64 {
        self.inner.steps()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    fn collect() -> (InterpreterOpts, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        let opts = InterpreterOpts {
            out: Box::new(move |v| out.lock().push(v.repr())),
            ..InterpreterOpts::default()
        };
        (opts, seen)
    }

    async fn run(src: &str) -> (Result<ExecStatus, AiScriptError>, Vec<String>) {
        let script = Parser::new().parse(src).unwrap();
        let (opts, seen) = collect();
        let result = Interpreter::new(IndexMap::new(), opts).exec(&script).await;
        let seen = seen.lock().clone();
        (result, seen)
    }

    #[tokio::test]
    async fn functions_closures_and_compound_assignment() {
        let src = r#"
            @counter() {
                var n = 0
                @() { n += 1; n }
            }
            let next = counter()
            next()
            <: next()
            var s = "a"
            s += "b"
            <: s
        "#;
        let (result, seen) = run(src).await;
        assert_eq!(result.unwrap(), ExecStatus::Finished);
        assert_eq!(seen, vec!["2", "\"ab\""]);
    }

    #[tokio::test]
    async fn if_is_an_expression_and_return_escapes_it() {
        let src = r#"
            @sign(x) {
                if x < 0 { return "neg" }
                if x == 0 { "zero" } else { "pos" }
            }
            <: [sign(-1), sign(0), sign(3)]
            let label = if false { 1 } elif true { 2 } else { 3 }
            <: label
        "#;
        let (result, seen) = run(src).await;
        result.unwrap();
        assert_eq!(seen, vec![r#"["neg", "zero", "pos"]"#, "2"]);
    }

    #[tokio::test]
    async fn loops_with_break_and_continue() {
        let src = r#"
            var out = []
            for let i, 10 {
                if i % 2 == 1 { continue }
                if i > 6 { break }
                Arr:push(out, i)
            }
            var n = 0
            loop { n += 1; if n == 3 { break } }
            <: out
            <: n
        "#;
        let (result, seen) = run(src).await;
        result.unwrap();
        assert_eq!(seen, vec!["[0, 2, 4, 6]", "3"]);
    }

    #[tokio::test]
    async fn error_family_uses_prefixed_names() {
        let cases = [
            ("1 + true", "AiScriptTypeError"),
            ("let x = 1\nx = 2", "AiScriptRuntimeError"),
            ("\"ab\"[2]", "AiScriptIndexOutOfRangeError"),
            ("Core:abort(\"bye\")", "AiScriptUserError"),
            ("if 1 { }", "AiScriptTypeError"),
        ];
        for (src, name) in cases {
            let (result, _) = run(src).await;
            let err = result.unwrap_err();
            let debug = format!("{err:?}");
            assert!(debug.starts_with(name), "{src}: {debug}");
        }
        let err = Parser::new().parse("#x = 1").unwrap_err();
        assert!(matches!(err, AiScriptError::AiScriptSyntaxError(_)));
    }

    #[tokio::test]
    async fn step_limit_stops_infinite_loops() {
        let script = Parser::new().parse("loop { }").unwrap();
        let opts = InterpreterOpts {
            max_step: Some(1_000),
            ..InterpreterOpts::default()
        };
        let interpreter = Interpreter::new(IndexMap::new(), opts);
        let err = interpreter.exec(&script).await.unwrap_err();
        assert!(matches!(err, AiScriptError::AiScriptRuntimeError(_)));
        assert!(interpreter.steps() > 1_000);
    }

    #[tokio::test]
    async fn counted_loops_spend_steps() {
        for src in [
            "for let i, 1000000000000000 { }",
            "each let x, Core:range(1, 100000) { }",
        ] {
            let script = Parser::new().parse(src).unwrap();
            let opts = InterpreterOpts {
                max_step: Some(1_000),
                ..InterpreterOpts::default()
            };
            let interpreter = Interpreter::new(IndexMap::new(), opts);
            let err = interpreter.exec(&script).await.unwrap_err();
            assert!(matches!(err, AiScriptError::AiScriptRuntimeError(_)), "{src}");
        }
    }

    #[tokio::test]
    async fn range_length_is_capped() {
        let (result, seen) = run("<: Core:range(3, 1)
Core:range(0, 1000000000000)").await;
        let err = result.unwrap_err();
        assert!(matches!(err, AiScriptError::AiScriptRuntimeError(_)));
        assert!(err.to_string().contains("range too long"), "{err}");
        assert_eq!(seen, vec!["[3, 2, 1]"]);
    }

    #[tokio::test]
    async fn declared_functions_are_freed_after_exec() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let opts = InterpreterOpts {
            out: Box::new(move |value| {
                if let Value::Fn(function) = value {
                    sink.lock().push(Arc::downgrade(&function));
                }
            }),
            ..InterpreterOpts::default()
        };
        let interpreter = Interpreter::new(IndexMap::new(), opts);
        let script = Parser::new().parse("@f() { f }\n<: f").unwrap();
        interpreter.exec(&script).await.unwrap();

        let function = seen.lock().pop().expect("function emitted");
        assert!(function.upgrade().is_none());
    }

    #[tokio::test]
    async fn deep_recursion_is_a_runtime_error() {
        let (result, _) = run("@f(n) { f(n + 1) }\nf(0)").await;
        assert!(matches!(result, Err(AiScriptError::AiScriptRuntimeError(_))));
    }

    #[tokio::test]
    async fn abort_wakes_a_sleeping_program() {
        let script = Parser::new().parse("<: 1\nCore:sleep(60000)\n<: 2").unwrap();
        let (opts, seen) = collect();
        let interpreter = Arc::new(Interpreter::new(IndexMap::new(), opts));
        let running = {
            let interpreter = Arc::clone(&interpreter);
            tokio::spawn(async move { interpreter.exec(&script).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        interpreter.abort();
        let status = running.await.unwrap().unwrap();
        assert_eq!(status, ExecStatus::Stopped);
        assert_eq!(*seen.lock(), vec!["1"]);
    }

    #[tokio::test]
    async fn consts_are_visible_and_final_value_is_logged() {
        let ended = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&ended);
        let opts = InterpreterOpts {
            log: Box::new(move |event| {
                if let Event::End { val } = event {
                    *sink.lock() = Some(val.map(|v| v.repr()));
                }
            }),
            ..InterpreterOpts::default()
        };
        let mut consts = IndexMap::new();
        consts.insert("LIMIT".to_string(), Value::Num(4.0));
        let interpreter = Interpreter::new(consts, opts);
        let script = Parser::new().parse("LIMIT * 2").unwrap();
        interpreter.exec(&script).await.unwrap();
        assert_eq!(*ended.lock(), Some(Some("8".to_string())));

        let script = Parser::new().parse("let unused = 1").unwrap();
        interpreter.exec(&script).await.unwrap();
        assert_eq!(*ended.lock(), Some(None));
    }
}
