//! Pipeline orchestration
//!
//! Per group, the pipeline walks through
//! `init → (save raw logs) → (stop if raw only) → preprocess →
//! (save event stream) → (check formulas) → statistics`, skipping the steps
//! whose mode is off. Groups, and formulas within a group, are processed one
//! at a time with at most one engine process alive.

mod error;
mod liveness;
mod messages;
mod orchestrator;
mod policy;

pub use error::PipelineError;
pub use messages::formula_link;
pub use orchestrator::Pipeline;
