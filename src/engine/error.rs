//! Release-neutral failures raised by the engine core.
//!
//! Each release wraps these into its own native error family; nothing outside
//! the `engine` module sees an [`EngineError`] directly.

use std::fmt;

use thiserror::Error;

use super::ast::Pos;

/// Failure category decided by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Source text could not be tokenized or parsed.
    Syntax,
    /// An operation received a value of the wrong type.
    Type,
    /// Any other evaluation failure (unknown variable, step limit, ...).
    Runtime,
    /// Array or string access outside its bounds.
    IndexOutOfRange,
    /// Raised deliberately by the program through `Core:abort`.
    User,
}

/// Error raised by the lexer, parser or interpreter.
#[derive(Debug, Clone, Error)]
#[error("{message}{}", PosSuffix(.pos))]
pub struct EngineError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: String,
    /// Source position, when known.
    pub pos: Option<Pos>,
}

impl EngineError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>, pos: Option<Pos>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, pos: Pos) -> Self {
        Self::new(ErrorKind::Syntax, message, Some(pos))
    }

    pub(crate) fn type_error(message: impl Into<String>, pos: Pos) -> Self {
        Self::new(ErrorKind::Type, message, Some(pos))
    }

    pub(crate) fn runtime(message: impl Into<String>, pos: Pos) -> Self {
        Self::new(ErrorKind::Runtime, message, Some(pos))
    }

    pub(crate) fn out_of_range(message: impl Into<String>, pos: Pos) -> Self {
        Self::new(ErrorKind::IndexOutOfRange, message, Some(pos))
    }
}

struct PosSuffix<'a>(&'a Option<Pos>);

impl fmt::Display for PosSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pos) => write!(f, " (Line {}, Column {})", pos.line, pos.column),
            None => Ok(()),
        }
    }
}

/// Convenience result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
