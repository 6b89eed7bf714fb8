//! Error types for the playground host

use thiserror::Error;

use crate::host::SessionId;

/// Host-level failure
#[derive(Debug, Error)]
pub enum HostError {
    /// No runner is registered for the requested release
    #[error("Unknown AiScript version '{0}'")]
    UnknownVersion(String),

    /// Session id not open in this playground
    #[error("Session '{0}' not found")]
    UnknownSession(SessionId),

    /// Registry has no runner to default to
    #[error("No AiScript versions registered")]
    NoVersions,
}

/// Result alias for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;
