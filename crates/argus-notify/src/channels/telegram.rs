use crate::Channel;
use anyhow::{Context, Result};
use argus_common::types::{Alert, Severity};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelegramConfig {
    bot_token: String,
    chat_id: String,
}

/// Sends alerts through the Telegram bot API.
pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let cfg: TelegramConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid telegram config: {e}"))?;
        Ok(Self::new(cfg.bot_token, cfg.chat_id))
    }

    /// MarkdownV2 body: bold title, then message, entities, and links.
    fn render_text(alert: &Alert) -> String {
        let marker = match alert.severity {
            Severity::Info => "\u{2139}\u{fe0f}",
            Severity::Warning => "\u{26a0}\u{fe0f}",
            Severity::Critical => "\u{1f6a8}",
        };
        let mut text = format!(
            "{marker} *{}*\n{}",
            escape_markdown(&alert.title),
            escape_markdown(&alert.message)
        );

        if !alert.entities.is_empty() {
            text.push('\n');
            let mut labels: Vec<_> = alert.entities.iter().collect();
            labels.sort();
            for (label, value) in labels {
                text.push_str(&format!(
                    "\n{}: {}",
                    escape_markdown(label),
                    escape_markdown(value)
                ));
            }
        }
        for link in &alert.links {
            text.push_str(&format!(
                "\n[{}]({})",
                escape_markdown(&link.label),
                escape_link_url(&link.url)
            ));
        }
        text
    }
}

/// Backslash-escape every character MarkdownV2 reserves in regular text.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*'
                | '['
                | ']'
                | '('
                | ')'
                | '~'
                | '`'
                | '>'
                | '#'
                | '+'
                | '-'
                | '='
                | '|'
                | '{'
                | '}'
                | '.'
                | '!'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside an inline-link URL only `)` and `\` are special.
fn escape_link_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": Self::render_text(alert),
                "parse_mode": "MarkdownV2",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .context("telegram request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram API returned {status}: {body}");
        }
        Ok(())
    }
}
