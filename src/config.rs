//! Pipeline configuration
//!
//! Settings come from an optional TOML file, are then overridden by the
//! environment, and finally by command line flags in `main`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::EngineConfig;

pub const ENV_ARTIFACTS: &str = "MONPOLY_PIPELINE_ARTIFACTS";
pub const ENV_GIT_REVISION: &str = "MONPOLY_PIPELINE_GIT_REVISION";
pub const ENV_ARTIFACTS_ON_HOST: &str = "MONPOLY_PIPELINE_ARTIFACTS_ON_HOST";
pub const ENV_ALERTS_SERVICE: &str = "IC_SLACK_POLICY_MONITORING_ALERTS_SERVICE";
pub const ENV_LIVENESS_SERVICE: &str = "IC_SLACK_POLICY_MONITORING_LIVENESS_SERVICE";

/// Steps of the pipeline that can be switched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Save the raw logs of each group
    Raw,
    /// Save the preprocessed event stream of each group
    SaveEventStream,
    /// Check every applicable formula
    UniversalPolicy,
    /// Verify once per run that the pipeline still detects violations
    CheckPipelineLiveness,
    /// Preprocess for all formulas, ignoring the formula selection
    PreProcessorTest,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Raw,
        Mode::SaveEventStream,
        Mode::UniversalPolicy,
        Mode::CheckPipelineLiveness,
        Mode::PreProcessorTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Raw => "raw",
            Mode::SaveEventStream => "save_event_stream",
            Mode::UniversalPolicy => "universal_policy",
            Mode::CheckPipelineLiveness => "check_pipeline_liveness",
            Mode::PreProcessorTest => "pre_processor_test",
        }
    }

    /// Modes of a regular monitoring run
    pub fn defaults() -> BTreeSet<Mode> {
        BTreeSet::from([
            Mode::CheckPipelineLiveness,
            Mode::UniversalPolicy,
            Mode::SaveEventStream,
            Mode::Raw,
        ])
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<_> = Mode::ALL.iter().map(Mode::as_str).collect();
                anyhow::anyhow!("Invalid mode: {s}. Valid values: {}", valid.join(", "))
            })
    }
}

/// Webhook service identifiers of the two alert channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackSettings {
    pub alerts_service: Option<String>,
    pub liveness_service: Option<String>,
}

/// Everything configurable about a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the signature file and one directory per formula
    pub policies_dir: PathBuf,
    /// Where run artifacts are stored, one subdirectory per run
    pub artifacts_dir: PathBuf,
    /// Location of `artifacts_dir` on the host, when running inside a container
    pub artifacts_on_host: Option<String>,
    /// Git revision of the policies, linked from alerts
    pub git_revision: String,
    pub modes: BTreeSet<Mode>,
    /// Restrict checking to these formulas
    pub formulas: Option<BTreeSet<String>>,
    /// Formulas that can only be checked with a global infra snapshot
    pub requires_global_infra: Vec<String>,
    /// Propagate faults instead of alerting them
    pub fail_hard: bool,
    pub slack: SlackSettings,
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            policies_dir: PathBuf::from("mfotl-policies"),
            artifacts_dir: PathBuf::from("./artifacts"),
            artifacts_on_host: None,
            git_revision: "master".to_string(),
            modes: Mode::defaults(),
            formulas: None,
            requires_global_infra: Vec::new(),
            fail_hard: false,
            slack: SlackSettings::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    /// Defaults, overridden by `path` when given, then by the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        if let Some(value) = env_value(ENV_ARTIFACTS) {
            self.artifacts_dir = PathBuf::from(value);
        }
        if let Some(value) = env_value(ENV_GIT_REVISION) {
            self.git_revision = value;
        }
        if let Some(value) = env_value(ENV_ARTIFACTS_ON_HOST) {
            self.artifacts_on_host = Some(value);
        }
        if let Some(value) = env_value(ENV_ALERTS_SERVICE) {
            self.slack.alerts_service = Some(value);
        }
        if let Some(value) = env_value(ENV_LIVENESS_SERVICE) {
            self.slack.liveness_service = Some(value);
        }
    }

    /// Launcher that fetches the artifacts of run `signature` and opens a
    /// shell in the engine image, for replaying repros on a developer host
    pub fn docker_starter(&self, signature: &str) -> Option<String> {
        let host_dir = self.artifacts_on_host.as_deref()?;
        let image = &self.engine.docker_image;
        Some(format!(
            "TEMP_DIR=$(mktemp -p \"$HOME\" -d) \
             && echo \"Downloading artifacts into $TEMP_DIR ...\" \
             && rsync -r -v {host_dir}/{signature} \"$TEMP_DIR\" \
             && docker image pull {image} \
             && docker run -it --workdir /work --rm --entrypoint sh \
             -v \"$TEMP_DIR/{signature}\":/repro {image}"
        ))
    }

    /// The part of the settings the pipeline itself needs
    pub fn pipeline_config(&self, signature: &str) -> PipelineConfig {
        PipelineConfig {
            policies_dir: self.policies_dir.clone(),
            modes: self.modes.clone(),
            engine: self.engine.clone(),
            docker_starter: self.docker_starter(signature),
            git_revision: self.git_revision.clone(),
            formulas: self.formulas.clone(),
            fail_hard: self.fail_hard,
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Configuration of one [`crate::pipeline::Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub policies_dir: PathBuf,
    pub modes: BTreeSet<Mode>,
    pub engine: EngineConfig,
    /// Launcher line prepended to host-runnable repros
    pub docker_starter: Option<String>,
    pub git_revision: String,
    pub formulas: Option<BTreeSet<String>>,
    pub fail_hard: bool,
}

impl PipelineConfig {
    pub fn has_mode(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    /// Only raw logs are requested: nothing to preprocess or check
    pub fn is_raw_only(&self) -> bool {
        self.modes.len() == 1 && self.has_mode(Mode::Raw)
    }
}

/// Unique name of a run: UTC start time plus a short random suffix
pub fn generate_signature() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y-%m-%dT%H-%M-%S"), &suffix[..8])
}
