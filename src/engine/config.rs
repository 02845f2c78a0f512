//! Configuration of the external checking engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::constants::{
    DEFAULT_DOCKER_IMAGE, DEFAULT_ENGINE_BINARY, DEFAULT_SESSION_TIMEOUT, DEFAULT_TIME_BINARY,
    DEFAULT_VARIABLES_TIMEOUT, SIGNATURE_FILE,
};

/// How MonPoly is invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable (inside the container when `docker` is set)
    pub binary: String,
    /// Run the engine inside `docker_image`
    pub docker: bool,
    pub docker_image: String,
    /// Signature file, relative to the policies directory
    pub signature_file: String,
    /// Ask the engine to close its input after the first violation
    pub stop_at_first_violation: bool,
    /// Wrap the engine in `time_binary` to record its peak RSS
    pub report_rss: bool,
    pub time_binary: String,
    pub session_timeout_secs: u64,
    pub variables_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_ENGINE_BINARY.to_string(),
            docker: true,
            docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
            signature_file: SIGNATURE_FILE.to_string(),
            stop_at_first_violation: true,
            report_rss: true,
            time_binary: DEFAULT_TIME_BINARY.to_string(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT.as_secs(),
            variables_timeout_secs: DEFAULT_VARIABLES_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    /// Hard wall-clock ceiling of one monitoring session
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Hard wall-clock ceiling of a free-variable query
    pub fn variables_timeout(&self) -> Duration {
        Duration::from_secs(self.variables_timeout_secs)
    }
}
