//! AiScript Runner – one contract over several releases of the AiScript engine
//!
//! This crate lets a host (a documentation playground, a CLI) parse and run
//! AiScript programs without knowing which engine release it talks to:
//! - [`engine`]: the embedded engine, published as the 0.14.1 and 0.16.0 releases
//! - [`runner`]: the [`Runner`] trait and one adapter per release
//! - [`host`]: release selection and playground sessions
//! - [`config`]: playground settings stored as JSON

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod runner;

// Re-export key types for convenience
pub use config::PlaygroundConfig;
pub use error::{HostError, HostResult};
pub use host::{Playground, RunOutcome, RunReport, RunnerRegistry, SessionId};
pub use runner::{ErrorLabel, ExecOutcome, OutputSink, ParseResult, Runner, SyntaxTree};

/// Current version of the aiscript-runner crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
