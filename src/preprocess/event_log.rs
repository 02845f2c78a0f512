//! Preprocessor for logs that already carry engine events

use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::catalog::FormulaCatalog;
use super::{PreProcessor, PreProcessorFactory};
use crate::models::{GlobalInfra, LogDoc};

/// Name of the event log preprocessor in artifact file names
pub const EVENT_LOG_PRE_PROCESSOR: &str = "unipol";

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct EventLogStats {
    documents: u64,
    events: u64,
    skipped: u64,
}

/// Reads one engine event per log document.
///
/// A document is either the event line itself (a JSON string) or an object
/// whose `event` field holds the line. Anything else is skipped and counted.
#[derive(Debug)]
pub struct EventLogPreProcessor {
    formulas: BTreeSet<String>,
    has_global_infra: bool,
    /// Counters of the last pass that ran to the end
    stats: Option<EventLogStats>,
}

impl EventLogPreProcessor {
    pub fn new(formulas: BTreeSet<String>, has_global_infra: bool) -> Self {
        Self {
            formulas,
            has_global_infra,
            stats: None,
        }
    }
}

impl PreProcessor for EventLogPreProcessor {
    fn name(&self) -> &str {
        EVENT_LOG_PRE_PROCESSOR
    }

    fn run<'a>(&'a mut self, logs: &'a [LogDoc]) -> Box<dyn Iterator<Item = String> + 'a> {
        Box::new(EventLogPass {
            docs: logs.iter(),
            counters: EventLogStats::default(),
            complete: &mut self.stats,
        })
    }

    fn formulas(&self) -> BTreeSet<String> {
        self.formulas.clone()
    }

    fn has_complete_stat(&self) -> bool {
        self.stats.is_some()
    }

    fn stat(&self) -> Value {
        let stats = self.stats.unwrap_or_default();
        json!({
            "name": EVENT_LOG_PRE_PROCESSOR,
            "documents": stats.documents,
            "events": stats.events,
            "skipped": stats.skipped,
            "formulas": self.formulas,
            "global_infra": self.has_global_infra,
        })
    }
}

/// One lazy pass over a group's documents; publishes its counters once the
/// documents are exhausted
struct EventLogPass<'a> {
    docs: std::slice::Iter<'a, LogDoc>,
    counters: EventLogStats,
    complete: &'a mut Option<EventLogStats>,
}

impl Iterator for EventLogPass<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        for doc in self.docs.by_ref() {
            self.counters.documents += 1;
            match extract_event(doc) {
                Some(event) => {
                    self.counters.events += 1;
                    return Some(event);
                }
                None => {
                    self.counters.skipped += 1;
                    debug!("Skipping log document without event: {doc}");
                }
            }
        }
        *self.complete = Some(self.counters);
        None
    }
}

fn extract_event(doc: &LogDoc) -> Option<String> {
    let line = match doc {
        Value::String(line) => line.as_str(),
        Value::Object(fields) => fields.get("event")?.as_str()?,
        _ => return None,
    };
    let line = line.trim_end_matches(['\r', '\n']);
    (!line.trim().is_empty()).then(|| line.to_string())
}

/// Creates [`EventLogPreProcessor`]s over the formulas of a policies directory
#[derive(Debug, Clone)]
pub struct EventLogPreProcessorFactory {
    catalog: FormulaCatalog,
}

impl EventLogPreProcessorFactory {
    pub fn new(catalog: FormulaCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FormulaCatalog {
        &self.catalog
    }
}

impl PreProcessorFactory for EventLogPreProcessorFactory {
    fn create(
        &self,
        infra: Option<&GlobalInfra>,
        formulas: Option<&BTreeSet<String>>,
    ) -> Box<dyn PreProcessor> {
        let selected: BTreeSet<String> = match formulas {
            Some(requested) => requested
                .iter()
                .filter(|formula| {
                    let known = self.catalog.contains(formula);
                    if !known {
                        warn!(formula = formula.as_str(), "Skipping unknown formula");
                    }
                    known
                })
                .cloned()
                .collect(),
            None => self.catalog.formulas().clone(),
        };

        // Without a snapshot, formulas that need one cannot be checked
        let selected = if infra.is_some() {
            selected
        } else {
            selected
                .into_iter()
                .filter(|formula| !self.catalog.requires_global_infra(formula))
                .collect()
        };

        Box::new(EventLogPreProcessor::new(selected, infra.is_some()))
    }

    fn formulas_without_global_infra(&self) -> BTreeSet<String> {
        self.catalog.without_global_infra()
    }

    fn is_global_infra_required(&self, formulas: Option<&BTreeSet<String>>) -> bool {
        formulas.is_some_and(|formulas| {
            formulas
                .iter()
                .any(|formula| self.catalog.requires_global_infra(formula))
        })
    }
}
