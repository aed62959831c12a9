pub mod telegram;
pub mod webhook;

use crate::Channel;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// Resolve a configured channel section to a concrete instance. The channel
/// set is closed; new transports extend this match.
pub fn build_channel(channel_type: &str, config: &Value) -> Result<Arc<dyn Channel>> {
    match channel_type {
        "webhook" => Ok(Arc::new(webhook::WebhookChannel::from_config(config)?)),
        "telegram" => Ok(Arc::new(telegram::TelegramChannel::from_config(config)?)),
        other => anyhow::bail!("unknown channel type: {other}"),
    }
}
