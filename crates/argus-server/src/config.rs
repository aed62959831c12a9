use anyhow::{Context, Result};
use argus_engine::config::{AlertingConfig, EngineConfig, PlatformSection};
use argus_common::types::ProbeDescriptor;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Days of run history and sent-alert records to keep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub channels: Vec<ChannelSection>,

    #[serde(default)]
    pub platforms: Vec<PlatformSection>,
    #[serde(default)]
    pub probes: Vec<ProbeDescriptor>,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub config: Value,
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        Ok(config)
    }

    /// The validated record the engine consumes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            platforms: self.platforms.clone(),
            probes: self.probes.clone(),
            alerting: self.alerting.clone(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    30
}
