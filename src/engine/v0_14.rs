//! Release 0.14.1: legacy surface syntax and the original error family.
//!
//! ```text
//! #greeting = "hello"
//! $count <- 0
//! count <- count + 1
//! <: greeting
//! ```

use indexmap::IndexMap;
use thiserror::Error;

use super::error::{EngineError, ErrorKind};
use super::interpreter::{self, Completion, Hooks};
use super::parser::parse_program;
use super::{Dialect, Event, Limits, Node, Value};

/// Release identifier.
pub const VERSION: &str = "0.14.1";

/// Base error of this release. Every failure it raises is one of these.
#[derive(Debug, Clone, Error)]
pub enum AiScriptError {
    /// Source text is not a valid program.
    #[error("SyntaxError: {0}")]
    SyntaxError(EngineError),
    /// Operand of the wrong type.
    #[error("TypeError: {0}")]
    TypeError(EngineError),
    /// Evaluation failure.
    #[error("RuntimeError: {0}")]
    RuntimeError(EngineError),
    /// Array or string access outside its bounds.
    #[error("IndexOutOfRangeError: {0}")]
    IndexOutOfRangeError(EngineError),
    /// Anything without a dedicated subclass, such as `Core:abort`.
    #[error("AiScriptError: {0}")]
    AiScriptError(EngineError),
}

impl AiScriptError {
    /// Underlying message and position.
    pub fn info(&self) -> &EngineError {
        match self {
            AiScriptError::SyntaxError(info)
            | AiScriptError::TypeError(info)
            | AiScriptError::RuntimeError(info)
            | AiScriptError::IndexOutOfRangeError(info)
            | AiScriptError::AiScriptError(info) => info,
        }
    }
}

impl From<EngineError> for AiScriptError {
    fn from(err: EngineError) -> Self {
        match err.kind {
            ErrorKind::Syntax => AiScriptError::SyntaxError(err),
            ErrorKind::Type => AiScriptError::TypeError(err),
            ErrorKind::Runtime => AiScriptError::RuntimeError(err),
            ErrorKind::IndexOutOfRange => AiScriptError::IndexOutOfRangeError(err),
            ErrorKind::User => AiScriptError::AiScriptError(err),
        }
    }
}

/// Parser for the legacy dialect.
pub struct Parser;

impl Parser {
    /// Parse a whole program.
    pub fn parse(source: &str) -> Result<Vec<Node>, AiScriptError> {
        Ok(parse_program(source, Dialect::Legacy)?)
    }
}

/// Interpreter options.
pub struct Opts {
    /// Receives every `<:` / `print` value.
    pub out: Box<dyn Fn(Value) + Send + Sync>,
    /// Receives lifecycle events.
    pub log: Box<dyn Fn(Event) + Send + Sync>,
    /// Per-execution limits.
    pub limits: Limits,
}

/// How [`Interpreter::exec`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The program ran to its end.
    Done,
    /// [`Interpreter::abort`] stopped it.
    Aborted,
}

/// Interpreter for parsed 0.14.1 programs.
pub struct Interpreter {
    inner: interpreter::Interpreter,
}

impl Interpreter {
    /// Create an interpreter with `consts` bound as global constants.
    pub fn new(consts: IndexMap<String, Value>, opts: Opts) -> Self {
        let hooks = Hooks {
            out: opts.out,
            log: opts.log,
        };
        Self {
            inner: interpreter::Interpreter::new(consts, hooks, opts.limits),
        }
    }

    /// Run a program.
    pub async fn exec(&self, script: &[Node]) -> Result<Exit, AiScriptError> {
        match self.inner.exec(script).await? {
            Completion::Finished(_) => Ok(Exit::Done),
            Completion::Aborted => Ok(Exit::Aborted),
        }
    }

    /// Read the `###` blocks of a program.
    pub fn collect_metadata(script: &[Node]) -> Option<IndexMap<Option<String>, Value>> {
        interpreter::Interpreter::collect_metadata(script)
    }

    /// Stop the current execution. Later executions stop immediately.
    pub fn abort(&self) {
        self.inner.abort();
    }
}
