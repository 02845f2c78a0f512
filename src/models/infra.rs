//! Global infrastructure snapshots

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Snapshot of the infrastructure a group ran on (subnets, nodes, data centers).
///
/// The pipeline treats the content as opaque: preprocessors interpret it, and
/// the statistics tree records it as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInfra {
    snapshot: Value,
}

impl GlobalInfra {
    pub fn new(snapshot: Value) -> Self {
        Self { snapshot }
    }

    /// Load a snapshot from YAML (`.yml`, `.yaml`) or JSON (`.json`)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read global infra file: {}", path.display()))?;

        let snapshot = match path.extension().and_then(|s| s.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str::<Value>(&content)
                .with_context(|| format!("Failed to parse YAML snapshot: {}", path.display()))?,
            Some("json") => serde_json::from_str::<Value>(&content)
                .with_context(|| format!("Failed to parse JSON snapshot: {}", path.display()))?,
            other => bail!(
                "unsupported global infra file format: {}",
                other.unwrap_or("<none>")
            ),
        };

        Ok(Self::new(snapshot))
    }

    pub fn to_value(&self) -> Value {
        self.snapshot.clone()
    }
}
