//! Alert delivery: the suppression pipeline and pluggable channels.
//!
//! Every alert a probe run produces passes through the
//! [`manager::AlertManager`] stages in order (mute, dedup, cooldown,
//! fan-out, record), and any suppressing stage stops the rest. Channels are
//! invoked concurrently with per-channel error isolation; built-ins cover
//! webhooks and Telegram.

pub mod channels;
pub mod manager;
pub mod set;

#[cfg(test)]
mod tests;

use anyhow::Result;
use argus_common::types::Alert;
use async_trait::async_trait;

/// A notification delivery channel (webhook endpoint, chat bot, pager).
///
/// `send` must return an error on transport-level failure; the pipeline logs
/// it and continues. Channels own their own timeouts and retries.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name used in logs (e.g. `"webhook"`, `"telegram"`).
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<()>;
}
