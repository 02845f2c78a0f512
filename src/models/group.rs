//! Test-run groups and their log sources

use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::Path;

use super::constants::CI_JOB_URL_BASE;
use super::infra::GlobalInfra;

/// One raw log document, as exported by the log store.
pub type LogDoc = Value;

/// A named test run processed as an independent unit.
///
/// Example group name: `boundary_nodes_pre_master__boundary_nodes_pot-2784039865`.
/// Groups are immutable once built; the `with_*` methods consume and return `self`.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    logs: Vec<LogDoc>,
    global_infra: Option<GlobalInfra>,
    url: Option<String>,
    generation: Option<u32>,
}

impl Group {
    pub fn new(name: impl Into<String>, logs: Vec<LogDoc>) -> Self {
        Self {
            name: name.into(),
            logs,
            global_infra: None,
            url: None,
            generation: None,
        }
    }

    pub fn with_global_infra(mut self, infra: GlobalInfra) -> Self {
        self.global_infra = Some(infra);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Suffix used in [`Group::safe_name`] so that artifacts of repeated runs do not clash
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logs(&self) -> &[LogDoc] {
        &self.logs
    }

    pub fn global_infra(&self) -> Option<&GlobalInfra> {
        self.global_infra.as_ref()
    }

    /// Reference URL for diagnostics: the explicit one, else the CI job page
    pub fn url(&self) -> Option<String> {
        self.url.clone().or_else(|| self.job_url())
    }

    /// Pot name, e.g. `boundary_nodes_pot` for the example group above
    pub fn pot_name(&self) -> &str {
        let last = self.name.rsplit("__").next().unwrap_or(&self.name);
        last.split('-').next().unwrap_or(last)
    }

    /// Locally invoked tests carry user and host components in their name
    pub fn is_group_name_local(name: &str) -> bool {
        name.chars().filter(|c| *c == '-').count() > 1
    }

    /// CI job ID encoded as the numeric suffix of the group name, if any
    pub fn job_id(&self) -> Option<u64> {
        if Self::is_group_name_local(&self.name) {
            return None;
        }
        let (_, suffix) = self.name.rsplit_once('-')?;
        suffix.parse().ok()
    }

    pub fn job_url(&self) -> Option<String> {
        self.job_id().map(|id| format!("{CI_JOB_URL_BASE}/{id}"))
    }

    /// Like the name, but never collides with artifacts of another generation
    pub fn safe_name(&self) -> String {
        match self.generation {
            Some(generation) => format!("{}--{generation}", self.name),
            None => self.name.clone(),
        }
    }

    /// Load a group previously saved in raw mode.
    ///
    /// The file holds a JSON array of log documents. Its name follows
    /// `<group name>[--<generation>].raw.log`.
    pub fn from_raw_log_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read raw log file: {}", path.display()))?;
        let logs: Vec<LogDoc> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse raw log file: {}", path.display()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Raw log path has no file name: {}", path.display()))?;
        let stem = file_name
            .strip_suffix(".raw.log")
            .or_else(|| file_name.split('.').next())
            .unwrap_or(file_name.as_str());

        let mut components = stem.split("--");
        let name = components.next().unwrap_or(stem).to_string();
        let group = Self::new(name, logs);

        Ok(match components.next().and_then(|g| g.parse().ok()) {
            Some(generation) => group.with_generation(generation),
            None => group,
        })
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Group name={}", self.name)?;
        if let Some(url) = self.url() {
            write!(f, " url={url}")?;
        }
        write!(f, ">")
    }
}
