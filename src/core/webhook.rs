//! Outgoing job webhooks. Delivery is best effort: the job record is the
//! source of truth, so a dead receiver is logged and forgotten, never
//! retried and never allowed to fail the job.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Crewd-Signature";

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            secret,
        }
    }

    /// POST a JSON payload to the receiver. With a secret configured the
    /// request carries an HMAC-SHA256 hex signature of the exact body bytes.
    pub async fn notify(&self, url: &str, payload: &Value) {
        let body = payload.to_string();
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("webhook delivered to {}", url);
            }
            Ok(response) => {
                warn!("webhook to {} returned {}", url, response.status());
            }
            Err(e) => {
                warn!("webhook to {} failed: {}", url, e);
            }
        }
    }
}

pub fn sign(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
