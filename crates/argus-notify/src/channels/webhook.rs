use crate::Channel;
use anyhow::Result;
use argus_common::types::Alert;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const RETRIES: u32 = 3;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WebhookConfig {
    url: String,
    body_template: Option<String>,
}

/// POSTs each alert as JSON to a configured URL, with a short exponential
/// backoff on failure.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    body_template: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, body_template: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            body_template,
        }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid webhook config: {e}"))?;
        Ok(Self::new(cfg.url, cfg.body_template))
    }

    fn render_body(&self, alert: &Alert) -> String {
        match &self.body_template {
            Some(template) => template
                .replace("{{id}}", &alert.id)
                .replace("{{probe_id}}", &alert.probe_id)
                .replace("{{rule_id}}", &alert.rule_id)
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{title}}", &alert.title)
                .replace("{{message}}", &alert.message)
                .replace("{{timestamp}}", &alert.timestamp.to_rfc3339()),
            None => serde_json::to_string(alert).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let body = self.render_body(alert);
        let mut last_err = None;

        for attempt in 0..RETRIES {
            match self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Webhook returned non-success status"
                    );
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Webhook send failed");
                    last_err = Some(e.into());
                }
            }
            if attempt + 1 < RETRIES {
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("webhook send failed")))
    }
}
