use thiserror::Error;

/// Runner failures that do not come from an engine. They classify as unknown.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// `exec` called after `dispose`
    #[error("runner for AiScript {version} has been disposed")]
    Disposed {
        /// Release of the disposed runner
        version: &'static str,
    },

    /// Tree parsed by a different release
    #[error("syntax tree from AiScript {found} cannot run on {expected}")]
    ForeignTree {
        /// Release of the runner
        expected: &'static str,
        /// Release that produced the tree
        found: &'static str,
    },

    /// The engine or the output sink panicked during execution
    #[error("AiScript {version} panicked: {message}")]
    Panicked {
        /// Release of the runner
        version: &'static str,
        /// Panic payload text
        message: String,
    },
}
