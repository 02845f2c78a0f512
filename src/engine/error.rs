//! Engine fault taxonomy

use std::time::Duration;
use thiserror::Error;

/// A fatal fault of one engine invocation.
///
/// Early input closure after a violation is not a fault; see
/// [`Submission::Closed`](super::Submission::Closed).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine fault while running `{cmd}`: {message}")]
    Engine { cmd: String, message: String },

    #[error("engine exceeded its hard timeout of {}s while running `{cmd}`", .timeout.as_secs())]
    Timeout { cmd: String, timeout: Duration },
}

impl SessionError {
    /// Command line of the failed invocation
    pub fn cmd(&self) -> &str {
        match self {
            SessionError::Spawn { cmd, .. }
            | SessionError::Engine { cmd, .. }
            | SessionError::Timeout { cmd, .. } => cmd,
        }
    }

    /// The message without the command line, for compact notifications
    pub fn message(&self) -> String {
        match self {
            SessionError::Spawn { source, .. } => format!("spawn failed: {source}"),
            SessionError::Engine { message, .. } => message.clone(),
            SessionError::Timeout { timeout, .. } => {
                format!("timed out after {}s", timeout.as_secs())
            }
        }
    }
}
