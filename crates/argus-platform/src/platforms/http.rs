use crate::platforms::{json_to_fact, value_at_path};
use crate::resilience::{upstream_key, BreakerError, ResilienceConfig, Upstream, UpstreamMap};
use crate::{Platform, Probe};
use anyhow::{Context, Result};
use argus_common::types::{FactValue, Facts, PlatformDescriptor, ProbeDescriptor, ProbeState};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const PLATFORM_ID: &str = "http";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpPlatformConfig {
    #[serde(default)]
    resilience: ResilienceConfig,
}

/// The scheduler's per-run deadline already bounds each collect; this only
/// caps a single request so one slow endpoint cannot stall the client pool.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// REST/JSON upstream family. One shared client; one breaker + limiter per
/// hostname.
pub struct HttpPlatform {
    client: reqwest::Client,
    upstreams: RwLock<Arc<UpstreamMap>>,
}

impl HttpPlatform {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            upstreams: RwLock::new(Arc::new(UpstreamMap::new(ResilienceConfig::default()))),
        }
    }

    fn upstreams(&self) -> Arc<UpstreamMap> {
        self.upstreams
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for HttpPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    fn describe(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            id: PLATFORM_ID.to_string(),
            display_name: "HTTP / REST".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            supported_probe_types: vec!["endpoint".to_string()],
        }
    }

    async fn initialize(&self, config: &Value) -> Result<()> {
        if config.is_null() {
            return Ok(());
        }
        let cfg: HttpPlatformConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid http platform config: {e}"))?;
        let mut guard = self
            .upstreams
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(UpstreamMap::new(cfg.resilience));
        Ok(())
    }

    fn create_probe(&self, descriptor: &ProbeDescriptor) -> Result<Box<dyn Probe>> {
        let cfg: EndpointConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| anyhow::anyhow!("probe '{}': invalid config: {e}", descriptor.id))?;
        let upstream = self.upstreams().get_or_create(&upstream_key(&cfg.url));
        Ok(Box::new(EndpointProbe {
            client: self.client.clone(),
            upstream,
            url: cfg.url,
            headers: cfg.headers,
            fields: cfg.fields,
        }))
    }

    async fn destroy(&self) -> Result<()> {
        // The shared client closes its pool on drop; nothing to flush.
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.upstreams().all_healthy().await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointConfig {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Fact suffix -> dotted path into the response JSON. Each extracted
    /// value lands as `http.<suffix>`.
    #[serde(default)]
    fields: HashMap<String, String>,
}

/// Probes one REST endpoint: status, latency, and optional JSON field
/// extraction.
struct EndpointProbe {
    client: reqwest::Client,
    upstream: Arc<Upstream>,
    url: String,
    headers: HashMap<String, String>,
    fields: HashMap<String, String>,
}

#[async_trait]
impl Probe for EndpointProbe {
    async fn collect(&self, _state: &mut ProbeState) -> Result<Facts> {
        let started = Instant::now();
        let result = self
            .upstream
            .run(|| async {
                let mut request = self.client.get(&self.url);
                for (name, value) in &self.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request
                    .send()
                    .await
                    .with_context(|| format!("GET {} failed", self.url))?;
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                Ok((status, body))
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let mut facts = Facts::new();
        facts.insert("http.latency_ms".to_string(), FactValue::Int(latency_ms));

        match result {
            Ok((status, body)) => {
                facts.insert("http.status".to_string(), FactValue::Int(status as i64));
                facts.insert(
                    "http.ok".to_string(),
                    FactValue::Bool((200..300).contains(&status)),
                );
                if !self.fields.is_empty() {
                    self.extract_fields(&body, &mut facts);
                }
                Ok(facts)
            }
            // Open breaker means the whole upstream is unreachable; let the
            // scheduler record a run-level failure.
            Err(e @ BreakerError::Open { .. }) => Err(e.into()),
            Err(BreakerError::Upstream(e)) => {
                tracing::warn!(url = %self.url, error = %e, "Endpoint request failed");
                facts.insert("http.status".to_string(), FactValue::Null);
                facts.insert("http.ok".to_string(), FactValue::Bool(false));
                facts.insert("http.error".to_string(), FactValue::Str(e.to_string()));
                Ok(facts)
            }
        }
    }
}

impl EndpointProbe {
    fn extract_fields(&self, body: &str, facts: &mut Facts) {
        let doc: Value = match serde_json::from_str(body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Response body is not JSON, skipping field extraction");
                for name in self.fields.keys() {
                    facts.insert(format!("http.{name}"), FactValue::Null);
                }
                return;
            }
        };
        for (name, path) in &self.fields {
            let value = value_at_path(&doc, path)
                .map(json_to_fact)
                .unwrap_or(FactValue::Null);
            facts.insert(format!("http.{name}"), value);
        }
    }
}
