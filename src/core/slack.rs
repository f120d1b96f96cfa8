//! Chat-webhook posting. One POST, `{"text": ...}` payload. Unlike job
//! webhooks this is part of a pipeline's own work, so failures propagate.

use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::Client;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn post(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "chat webhook returned {}",
                response.status()
            ));
        }
        Ok(())
    }
}
