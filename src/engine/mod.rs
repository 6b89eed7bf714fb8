//! Embedded AiScript engine.
//!
//! The lexer, parser and interpreter are shared; each release module wraps
//! them behind its own public API, surface dialect and error family. Code
//! outside this module should only go through [`v0_14`] and [`v0_16`].

mod ast;
mod builtins;
mod error;
mod interpreter;
mod lexer;
mod parser;
mod scope;
mod value;

pub mod v0_14;
pub mod v0_16;

pub use ast::{Node, NodeKind, Pos};
pub use error::{EngineError, ErrorKind};
pub use interpreter::{Event, Limits};
pub use value::{Value, format_num};

use lexer::Keyword;

/// Surface syntax accepted by a release's parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    /// `#x = 1`, `$y <- 2`, `yes` / `no` / `_`.
    Legacy,
    /// `let x = 1`, `var y = 2`, `true` / `false` / `null`.
    Modern,
}

impl Dialect {
    pub(crate) fn keyword(self, word: &str) -> Option<Keyword> {
        let keyword = match word {
            "if" => Keyword::If,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "loop" => Keyword::Loop,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "return" => Keyword::Return,
            "each" => Keyword::Each,
            "for" => Keyword::For,
            _ => return self.literal_keyword(word),
        };
        Some(keyword)
    }

    fn literal_keyword(self, word: &str) -> Option<Keyword> {
        match (self, word) {
            (Dialect::Modern, "let") => Some(Keyword::Let),
            (Dialect::Modern, "var") => Some(Keyword::Var),
            (Dialect::Modern, "true") | (Dialect::Legacy, "yes") => Some(Keyword::True),
            (Dialect::Modern, "false") | (Dialect::Legacy, "no") => Some(Keyword::False),
            (Dialect::Modern, "null") | (Dialect::Legacy, "_") => Some(Keyword::Null),
            _ => None,
        }
    }
}
