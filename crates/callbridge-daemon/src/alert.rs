//! Operator alerting
//!
//! Non-fatal but operator-visible conditions (sender overload, a tenant
//! list that will not refresh) go through here. Delivery is fire-and-forget:
//! the alert always lands in the log, and additionally in a webhook when one
//! is configured. A failing webhook never propagates an error.

use callbridge_common::{BridgeError, Result};
use std::time::Duration;
use tracing::{error, warn};

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Alerter {
    webhook: Option<String>,
    client: reqwest::Client,
}

impl Alerter {
    pub fn new(webhook: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        Ok(Self { webhook, client })
    }

    pub async fn notify(&self, message: &str) {
        warn!("ALERT: {}", message);

        let Some(url) = &self.webhook else { return };
        let body = serde_json::json!({ "text": message });
        let outcome = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(err) = outcome {
            error!("Failed to deliver alert to webhook: {}", err);
        }
    }
}
