//! Preprocessing: raw group logs to engine event streams
//!
//! A preprocessor turns the log documents of one group into the ordered
//! sequence of events the engine consumes, and knows which formulas make
//! sense for that group.

mod catalog;
mod event_log;

pub use catalog::FormulaCatalog;
pub use event_log::{EventLogPreProcessor, EventLogPreProcessorFactory, EVENT_LOG_PRE_PROCESSOR};

use serde_json::Value;
use std::collections::BTreeSet;

use crate::models::{GlobalInfra, LogDoc};

/// One preprocessing variant bound to a group's context
pub trait PreProcessor {
    /// Identifies the variant in artifact names
    fn name(&self) -> &str;

    /// Events extracted from `logs`, produced lazily.
    ///
    /// Each call starts a fresh pass. A pass that is abandoned before its end
    /// leaves [`PreProcessor::stat`] untouched.
    fn run<'a>(&'a mut self, logs: &'a [LogDoc]) -> Box<dyn Iterator<Item = String> + 'a>;

    /// Formulas to check against the produced events
    fn formulas(&self) -> BTreeSet<String>;

    /// Whether some pass ran to the end, so [`PreProcessor::stat`] covers
    /// every document
    fn has_complete_stat(&self) -> bool;

    /// Statistics of the last complete pass
    fn stat(&self) -> Value;
}

/// Builds preprocessors for groups
pub trait PreProcessorFactory {
    /// A preprocessor for a group with `infra`, restricted to `formulas`
    /// when given
    fn create(
        &self,
        infra: Option<&GlobalInfra>,
        formulas: Option<&BTreeSet<String>>,
    ) -> Box<dyn PreProcessor>;

    /// Formulas that can be checked without global infra
    fn formulas_without_global_infra(&self) -> BTreeSet<String>;

    /// Whether checking `formulas` needs a global infra snapshot
    fn is_global_infra_required(&self, formulas: Option<&BTreeSet<String>>) -> bool;
}
