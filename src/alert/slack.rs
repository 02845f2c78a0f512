//! Alerts posted to a Slack incoming webhook

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::json;
use std::time::Duration;

use super::{AlertLevel, AlertSink};
use crate::utils::truncate;

const WEBHOOK_BASE: &str = "https://hooks.slack.com/services";

/// Slack rejects section blocks with more text than this
const MAX_SECTION_CHARS: usize = 3000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlackSink {
    client: Client,
    url: String,
    signature: String,
    git_revision: String,
}

impl SlackSink {
    /// `service_id` is the secret path of the webhook (`T000/B000/XXXX`)
    pub fn new(service_id: &str, signature: &str, git_revision: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{WEBHOOK_BASE}/{service_id}"),
            signature: signature.to_string(),
            git_revision: git_revision.to_string(),
        })
    }

    /// Webhook payload for one alert
    pub fn payload(&self, level: AlertLevel, text: &str, short_text: &str) -> serde_json::Value {
        let body = format!(
            "{level} {text}\n_run `{}` at revision `{}`_",
            self.signature, self.git_revision
        );
        json!({
            "text": format!("{level} {short_text}"),
            "blocks": [{
                "type": "section",
                "text": {"type": "mrkdwn", "text": truncate(&body, MAX_SECTION_CHARS)},
            }],
        })
    }
}

impl AlertSink for SlackSink {
    fn alert(&self, level: AlertLevel, text: &str, short_text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&self.payload(level, text, short_text))
            .send()
            .context("Failed to reach Slack webhook")?
            .error_for_status()
            .context("Slack webhook rejected the alert")?;
        Ok(())
    }
}
