//! Per-group statistics tree

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome counters of one monitoring session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub events_submitted: u64,
    pub violations: u64,
    pub errors: u64,
    /// Violations that could not be mapped onto variable names
    pub decode_fallbacks: u64,
    pub exit_code: Option<i32>,
    pub peak_rss_kb: Option<u64>,
    pub wall_clock_secs: f64,
    /// The engine closed its input before the stream was exhausted
    pub early_stop: bool,
    pub timed_out: bool,
}

/// Statistics gathered while processing a single group.
///
/// Serialized with the subtree names the downstream dashboards expect.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupStats {
    pub pre_processor: Value,
    pub monpoly: BTreeMap<String, EngineStats>,
    pub global_infra: Option<Value>,
}

impl GroupStats {
    pub fn new(global_infra: Option<Value>) -> Self {
        Self {
            pre_processor: Value::Object(Default::default()),
            monpoly: BTreeMap::new(),
            global_infra,
        }
    }
}

/// Statistics of a whole run, keyed by group name
pub type StatsTree = BTreeMap<String, GroupStats>;
