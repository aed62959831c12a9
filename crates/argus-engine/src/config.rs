use anyhow::Result;
use argus_common::types::ProbeDescriptor;
use argus_platform::registry::PlatformSettings;
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// The validated configuration record the engine consumes.
///
/// File parsing and unknown-field rejection happen in the external loader;
/// `deny_unknown_fields` backs that contract at the type level.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub platforms: Vec<PlatformSection>,
    pub probes: Vec<ProbeDescriptor>,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    pub platform: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertingConfig {
    /// Minimum seconds between two deliveries for the same (probe, rule).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Dedup retention. Absent means an alert id is suppressed forever once
    /// sent (until operator cleanup re-arms it).
    pub dedup_ttl_secs: Option<u64>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            dedup_ttl_secs: None,
        }
    }
}

impl AlertingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn dedup_ttl(&self) -> Option<Duration> {
        self.dedup_ttl_secs
            .map(|secs| Duration::seconds(secs as i64))
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    900
}

impl EngineConfig {
    /// Cross-field checks the serde layer cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for probe in &self.probes {
            if probe.id.is_empty() {
                anyhow::bail!("probe id must not be empty");
            }
            if !seen.insert(probe.id.as_str()) {
                anyhow::bail!("duplicate probe id '{}'", probe.id);
            }
            if probe.interval == 0 {
                anyhow::bail!("probe '{}': interval must be positive", probe.id);
            }
            if probe.timeout == 0 {
                anyhow::bail!("probe '{}': timeout must be positive", probe.id);
            }
        }
        Ok(())
    }

    /// Per-platform settings keyed by platform id, for registry
    /// initialization.
    pub fn platform_settings(&self) -> HashMap<String, PlatformSettings> {
        self.platforms
            .iter()
            .map(|section| {
                (
                    section.platform.clone(),
                    PlatformSettings {
                        enabled: section.enabled,
                        config: section.config.clone(),
                    },
                )
            })
            .collect()
    }
}
