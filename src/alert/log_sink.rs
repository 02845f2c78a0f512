//! Alerts written to the log, used when no webhook is configured

use anyhow::Result;
use tracing::{error, info, warn};

use super::{AlertLevel, AlertSink};

#[derive(Debug, Clone)]
pub struct LogSink {
    channel: String,
    signature: String,
    git_revision: String,
}

impl LogSink {
    pub fn new(channel: &str, signature: &str, git_revision: &str) -> Self {
        Self {
            channel: channel.to_string(),
            signature: signature.to_string(),
            git_revision: git_revision.to_string(),
        }
    }
}

impl AlertSink for LogSink {
    fn alert(&self, level: AlertLevel, text: &str, short_text: &str) -> Result<()> {
        let channel = self.channel.as_str();
        let signature = self.signature.as_str();
        let revision = self.git_revision.as_str();
        match level {
            AlertLevel::LivenessOk => {
                info!(channel, signature, revision, "{level} {short_text}\n{text}")
            }
            AlertLevel::LivenessBroken | AlertLevel::PipelineFailure => {
                error!(channel, signature, revision, "{level} {short_text}\n{text}")
            }
            _ => warn!(channel, signature, revision, "{level} {short_text}\n{text}"),
        }
        Ok(())
    }
}
