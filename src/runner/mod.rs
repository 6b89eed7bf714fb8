//! Version-agnostic runner contract
//!
//! A [`Runner`] parses and executes programs against exactly one engine
//! release. Hosts hold runners as `Box<dyn Runner>` and never touch the
//! release-specific types: syntax trees are opaque, failures are carried as
//! [`anyhow::Error`] and turned into stable [`ErrorLabel`]s on request.

mod error;
mod sink;
mod v0_14;
mod v0_16;

use std::any::Any;
use std::fmt;
use std::panic::{self, UnwindSafe};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use error::RunnerError;
pub use sink::{OutputSink, render_output};
pub use v0_14::AiScript014Runner;
pub use v0_16::AiScript016Runner;

/// Metadata collected from `###` blocks: optional name to JSON value, in
/// source order.
pub type Metadata = IndexMap<Option<String>, serde_json::Value>;

/// Outcome of [`Runner::parse`].
pub type ParseResult = Result<Parsed, ParseFailure>;

/// Successfully parsed program.
#[derive(Debug)]
pub struct Parsed {
    /// Tree to hand back to [`Runner::exec`] of the same runner.
    pub tree: SyntaxTree,
    /// Metadata declared by the program; empty when there is none.
    pub metadata: Metadata,
}

/// Failed parse.
#[derive(Debug)]
pub struct ParseFailure {
    error: Option<anyhow::Error>,
}

impl ParseFailure {
    pub(crate) fn native(error: anyhow::Error) -> Self {
        Self { error: Some(error) }
    }

    pub(crate) fn unrecognized() -> Self {
        Self { error: None }
    }

    /// Engine-native error, or `None` when the failure did not come from the
    /// engine's own error family.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// Take ownership of the error.
    pub fn into_error(self) -> Option<anyhow::Error> {
        self.error
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{error}"),
            None => f.write_str("parse failed"),
        }
    }
}

/// Parsed program, opaque outside the runner that produced it.
pub struct SyntaxTree {
    version: &'static str,
    nodes: Box<dyn Any + Send + Sync>,
}

impl SyntaxTree {
    pub(crate) fn new<T: Any + Send + Sync>(version: &'static str, nodes: T) -> Self {
        Self {
            version,
            nodes: Box::new(nodes),
        }
    }

    /// Release that produced the tree.
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Borrow the release-native tree, refusing trees from other releases.
    pub(crate) fn native<T: Any>(&self, expected: &'static str) -> Result<&T, RunnerError> {
        let foreign = || RunnerError::ForeignTree {
            expected,
            found: self.version,
        };
        if self.version != expected {
            return Err(foreign());
        }
        self.nodes.downcast_ref::<T>().ok_or_else(foreign)
    }
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// How a successful [`Runner::exec`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    /// The program ran to its end.
    Completed,
    /// The runner was disposed while the program was running.
    Aborted,
}

/// Stable, release-independent failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorLabel {
    /// Source text is not a valid program.
    SyntaxError,
    /// Operand of the wrong type.
    TypeError,
    /// Other evaluation failure.
    RuntimeError,
    /// Out of bounds array or string access.
    IndexOutOfRangeError,
    /// Engine error without a more specific label.
    GenericEngineError,
}

impl ErrorLabel {
    /// Label as shown to users.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorLabel::SyntaxError => "SyntaxError",
            ErrorLabel::TypeError => "TypeError",
            ErrorLabel::RuntimeError => "RuntimeError",
            ErrorLabel::IndexOutOfRangeError => "IndexOutOfRangeError",
            ErrorLabel::GenericEngineError => "GenericEngineError",
        }
    }
}

impl fmt::Display for ErrorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform capability set of every engine release adapter.
///
/// Calls on one runner are expected to be serialized by the host, with one
/// exception: [`Runner::dispose`] may be called while [`Runner::exec`] is
/// pending and cancels it.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Engine release this runner is bound to, e.g. `"0.16.0"`.
    fn version(&self) -> &'static str;

    /// Parse `code`. Never panics; every failure becomes [`ParseFailure`].
    fn parse(&self, code: &str) -> ParseResult;

    /// Run a tree produced by [`Runner::parse`] of this runner. Output goes to
    /// the sink in program order, followed by the final value if the program
    /// produced one. Engine failures are returned as errors for
    /// [`Runner::classify_error`].
    async fn exec(&self, tree: &SyntaxTree) -> anyhow::Result<ExecOutcome>;

    /// Label an error. `None` means the error is not from this release's
    /// engine.
    fn classify_error(&self, error: &anyhow::Error) -> Option<ErrorLabel>;

    /// Label name of an error, `None` when unknown.
    fn error_name(&self, error: &anyhow::Error) -> Option<&'static str> {
        self.classify_error(error).map(ErrorLabel::as_str)
    }

    /// Abort any running program and release the interpreter and the sink.
    /// Calling it again has no effect.
    fn dispose(&self);
}

/// Classify `error` against a release's ordered table of native error
/// predicates. Errors of type `E` that match no entry are generic.
pub(crate) fn classify_with<E>(
    error: &anyhow::Error,
    table: &[(ErrorLabel, fn(&E) -> bool)],
) -> Option<ErrorLabel>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let native = error.downcast_ref::<E>()?;
    let label = table
        .iter()
        .find(|(_, is_kind)| is_kind(native))
        .map(|(label, _)| *label)
        .unwrap_or(ErrorLabel::GenericEngineError);
    Some(label)
}

/// Run a release's native parser. Its own errors become
/// [`ParseFailure::native`]; a panic becomes [`ParseFailure::unrecognized`].
pub(crate) fn parse_with<T, E>(
    version: &'static str,
    parse: impl FnOnce() -> Result<T, E> + UnwindSafe,
) -> Result<T, ParseFailure>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match panic::catch_unwind(parse) {
        Ok(Ok(parsed)) => Ok(parsed),
        Ok(Err(err)) => {
            tracing::debug!(version, error = %err, "parse failed");
            Err(ParseFailure::native(err.into()))
        }
        Err(payload) => {
            tracing::warn!(version, panic = %panic_message(&*payload), "parser panicked");
            Err(ParseFailure::unrecognized())
        }
    }
}

/// Convert release metadata into the contract's JSON form.
pub(crate) fn metadata_json(
    collected: Option<IndexMap<Option<String>, crate::engine::Value>>,
) -> Metadata {
    collected
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.to_json()))
        .collect()
}

/// Best effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_trees_are_refused() {
        let tree = SyntaxTree::new("0.14.1", vec![1u8]);
        assert!(tree.native::<Vec<u8>>("0.14.1").is_ok());
        let err = tree.native::<Vec<u8>>("0.16.0").unwrap_err();
        assert!(matches!(
            err,
            RunnerError::ForeignTree {
                expected: "0.16.0",
                found: "0.14.1"
            }
        ));
        assert!(tree.native::<String>("0.14.1").is_err());
    }

    #[test]
    fn panic_payloads_become_text() {
        let code = 1;
        let payload = std::panic::catch_unwind(|| {
            if code > 0 {
                panic!("boom {code}");
            }
        })
        .unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 1");
        let payload = std::panic::catch_unwind(|| {
            if code > 0 {
                std::panic::panic_any(7u8);
            }
        })
        .unwrap_err();
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn parser_panic_is_an_unrecognized_failure() {
        use crate::engine::v0_16::AiScriptError;

        let code = "<: 1";
        let failure = parse_with("0.16.0", || -> Result<(), AiScriptError> {
            if !code.is_empty() {
                panic!("parser bug");
            }
            Ok(())
        })
        .unwrap_err();
        assert!(failure.error().is_none());
        assert_eq!(failure.to_string(), "parse failed");

        let runner = AiScript016Runner::new(std::sync::Arc::new(|_: &str| {}));
        let label = failure.error().and_then(|err| runner.classify_error(err));
        assert_eq!(label, None);
    }

    #[test]
    fn native_parse_errors_are_kept() {
        use crate::engine::v0_16::Parser;

        let parser = Parser::new();
        let failure = parse_with("0.16.0", || parser.parse("1 +")).unwrap_err();
        let runner = AiScript016Runner::new(std::sync::Arc::new(|_: &str| {}));
        let label = failure.error().and_then(|err| runner.classify_error(err));
        assert_eq!(label, Some(ErrorLabel::SyntaxError));
        assert_eq!(parse_with("0.16.0", || parser.parse("<: 1")).unwrap().len(), 1);
    }

    #[test]
    fn labels_serialize_by_name() {
        let json = serde_json::to_string(&ErrorLabel::IndexOutOfRangeError).unwrap();
        assert_eq!(json, "\"IndexOutOfRangeError\"");
        assert_eq!(ErrorLabel::GenericEngineError.to_string(), "GenericEngineError");
    }
}
