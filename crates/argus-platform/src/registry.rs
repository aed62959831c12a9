use crate::Platform;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-platform section of the engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config: Value::Null,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Lifecycle manager for platform plugins.
///
/// Registration happens once at startup; afterwards the registry hands out
/// shared references for probe minting and fans out health checks.
pub struct PlatformRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            platforms: HashMap::new(),
        }
    }

    pub fn register(&mut self, platform: Arc<dyn Platform>) -> Result<()> {
        let id = platform.describe().id;
        if self.platforms.contains_key(&id) {
            anyhow::bail!("platform '{id}' is already registered");
        }
        self.platforms.insert(id, platform);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Platform>> {
        self.platforms.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.platforms.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<dyn Platform>> {
        self.platforms.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.platforms.keys().map(String::as_str).collect()
    }

    /// Initializes every registered platform that is enabled in its settings
    /// (platforms absent from `settings` default to enabled with an empty
    /// config). A single failure aborts startup, naming the platform.
    pub async fn initialize_all(
        &self,
        settings: &HashMap<String, PlatformSettings>,
    ) -> Result<()> {
        for (id, platform) in &self.platforms {
            let section = settings.get(id).cloned().unwrap_or_default();
            if !section.enabled {
                tracing::info!(platform = %id, "Platform disabled, skipping initialization");
                continue;
            }
            platform
                .initialize(&section.config)
                .await
                .with_context(|| format!("failed to initialize platform '{id}'"))?;
            tracing::info!(platform = %id, "Platform initialized");
        }
        Ok(())
    }

    /// Tears every platform down, logging per-platform errors instead of
    /// aborting the shutdown path.
    pub async fn destroy_all(&self) {
        for (id, platform) in &self.platforms {
            if let Err(e) = platform.destroy().await {
                tracing::error!(platform = %id, error = %e, "Platform teardown failed");
            }
        }
    }

    /// Concurrent health fan-out across all registered platforms.
    pub async fn health_status(&self) -> HashMap<String, bool> {
        let checks = self.platforms.iter().map(|(id, platform)| {
            let id = id.clone();
            let platform = platform.clone();
            async move { (id, platform.health_check().await) }
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
