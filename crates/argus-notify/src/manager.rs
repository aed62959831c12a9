use crate::set::ChannelSet;
use anyhow::Result;
use argus_common::ident;
use argus_common::types::{Alert, ProbeState};
use argus_storage::StateStore;
use chrono::{Duration, Utc};
use std::sync::Arc;

pub fn default_cooldown() -> Duration {
    Duration::minutes(15)
}

/// Where an alert left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Delivered,
    Muted,
    Deduplicated,
    InCooldown,
}

/// Applies the suppression pipeline to each emitted alert:
/// mute → dedup → cooldown → fan-out → record.
///
/// Mute runs before dedup so a muted probe never records anything and
/// resumes cleanly after unmute. Dedup precedes cooldown so a recurring
/// identical event does not consume the cooldown slot. Channel failures do
/// not poison the record stage; a transiently failing transport still marks
/// the alert sent.
pub struct AlertManager {
    store: Arc<StateStore>,
    channels: ChannelSet,
    cooldown: Duration,
    dedup_ttl: Option<Duration>,
}

impl AlertManager {
    pub fn new(
        store: Arc<StateStore>,
        channels: ChannelSet,
        cooldown: Duration,
        dedup_ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            channels,
            cooldown,
            dedup_ttl,
        }
    }

    /// Default policy: 15-minute cooldown, permanent dedup.
    pub fn with_defaults(store: Arc<StateStore>, channels: ChannelSet) -> Self {
        Self::new(store, channels, default_cooldown(), None)
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Runs one alert through the pipeline against the probe state the
    /// scheduler loaded for this run.
    pub async fn process(&self, alert: &Alert, probe_state: &ProbeState) -> Result<AlertOutcome> {
        if probe_state.is_muted(Utc::now()) {
            tracing::debug!(alert_id = %alert.id, "Alert suppressed (probe muted)");
            return Ok(AlertOutcome::Muted);
        }

        if self.store.is_alert_sent(&alert.id, self.dedup_ttl)? {
            tracing::debug!(alert_id = %alert.id, "Alert suppressed (already sent)");
            return Ok(AlertOutcome::Deduplicated);
        }

        let cooldown_key = ident::cooldown_key(&alert.probe_id, &alert.rule_id);
        if self.store.is_in_cooldown(&cooldown_key, self.cooldown)? {
            tracing::debug!(
                alert_id = %alert.id,
                key = %cooldown_key,
                "Alert suppressed (cooldown)"
            );
            return Ok(AlertOutcome::InCooldown);
        }

        self.channels.send_all(alert).await;

        self.store
            .record_alert(&alert.id, &alert.probe_id, &alert.rule_id)?;
        self.store.record_cooldown(&cooldown_key)?;

        tracing::info!(
            alert_id = %alert.id,
            probe_id = %alert.probe_id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            "Alert delivered"
        );
        Ok(AlertOutcome::Delivered)
    }

    /// Processes a run's alerts in the order the rules produced them.
    /// Store failures are logged per alert and do not stop the batch; a
    /// transiently unreadable dedup table causes re-sends, not data loss.
    pub async fn process_all(&self, alerts: &[Alert], probe_state: &ProbeState) {
        for alert in alerts {
            if let Err(e) = self.process(alert, probe_state).await {
                tracing::error!(alert_id = %alert.id, error = %e, "Alert pipeline failed");
            }
        }
    }
}
