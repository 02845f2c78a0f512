//! External checking engine (MonPoly)
//!
//! Builds engine command lines, runs one monitoring session per
//! (group, formula) pair, and queries formulas for their free variables.
//!
//! # Session lifecycle
//!
//! A session is spawned, fed events with [`MonitorSession::submit`], and then
//! closed. If the engine stops reading after its first violation, `submit`
//! returns [`Submission::Closed`]; this is an expected outcome, not a fault.
//! Every other failure is a [`SessionError`] carrying the failing command.
//! Whatever happens, the engine process is terminated and its exit reported
//! once through the session's event channel.

mod command;
mod config;
mod error;
mod session;
mod variables;

pub use command::{render_command, EngineCommand, RSS_REPORT_PREFIX};
pub use config::EngineConfig;
pub use error::SessionError;
pub use session::{
    classify_stderr, classify_stdout, split_rss_report, MonitorSession, SessionEvent,
    SessionSummary, Submission,
};
pub use variables::{fetch_variables, parse_free_variables, VariableCache};
