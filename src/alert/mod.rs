//! Alert delivery
//!
//! The pipeline reports to two independent channels: one for policy
//! violations and engine trouble, one for liveness heartbeats. Delivery is
//! fire-and-forget; sinks do not retry.

mod log_sink;
mod slack;

pub use log_sink::LogSink;
pub use slack::SlackSink;

use anyhow::Result;
use std::fmt;

/// Severity and kind of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertLevel {
    /// A group violated a policy
    Violation,
    /// The engine reported an error while checking a policy
    EngineError,
    /// The engine exited with a non-zero code
    AbnormalExit,
    /// The engine session failed as a whole
    EngineFault,
    /// The liveness check observed the expected violation
    LivenessOk,
    /// The liveness check did not observe the expected violation
    LivenessBroken,
    /// The pipeline stopped on an unhandled error
    PipelineFailure,
}

impl AlertLevel {
    pub fn marker(&self) -> &'static str {
        match self {
            AlertLevel::Violation => "🎩",
            AlertLevel::EngineError => "🍊",
            AlertLevel::AbnormalExit => "🚱",
            AlertLevel::EngineFault => "🏮",
            AlertLevel::LivenessOk => "✅🍏✅🍏✅🍏✅",
            AlertLevel::LivenessBroken => "🔥💀🔥💀🔥💀🔥",
            AlertLevel::PipelineFailure => "🔥",
        }
    }

    /// Whether this level signals that something needs attention
    pub fn is_problem(&self) -> bool {
        !matches!(self, AlertLevel::LivenessOk)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// An output channel for notifications
pub trait AlertSink {
    /// Deliver one notification. `short_text` is a one-line summary for
    /// previews; `text` is the full body.
    fn alert(&self, level: AlertLevel, text: &str, short_text: &str) -> Result<()>;
}
