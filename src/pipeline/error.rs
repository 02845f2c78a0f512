//! Pipeline-level errors

use thiserror::Error;

use crate::engine::SessionError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no groups to monitor; check that system tests are running")]
    NoGroups,

    #[error("group `{0}` was given more than once")]
    DuplicateGroup(String),

    /// The group cannot be processed with the current configuration
    #[error("precondition failed for group `{group}`: {message}")]
    Precondition { group: String, message: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Artifact storage and alert delivery failures
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Errors confined to one group that the pipeline may report and move past
    pub fn is_group_scoped(&self) -> bool {
        matches!(self, PipelineError::Precondition { .. })
    }
}
