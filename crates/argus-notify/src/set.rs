use crate::Channel;
use argus_common::types::Alert;
use std::sync::Arc;

/// The registered delivery channels for one engine instance.
///
/// Fan-out is concurrent and waits for every channel to settle; a failing
/// channel is logged and isolated, never aborting the others or the caller.
#[derive(Clone, Default)]
pub struct ChannelSet {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        tracing::info!(channel = channel.name(), "Delivery channel registered");
        self.channels.push(channel);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Delivers one alert to every channel concurrently. Outcomes surface
    /// only through logs.
    pub async fn send_all(&self, alert: &Alert) {
        let sends = self.channels.iter().map(|channel| {
            let channel = channel.clone();
            async move {
                if let Err(e) = channel.send(alert).await {
                    tracing::error!(
                        channel = channel.name(),
                        alert_id = %alert.id,
                        error = %e,
                        "Channel delivery failed"
                    );
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}
