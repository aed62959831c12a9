use crate::resilience::{upstream_key, BreakerError, ResilienceConfig, Upstream, UpstreamMap};
use crate::{Platform, Probe};
use anyhow::{Context, Result};
use argus_common::types::{FactValue, Facts, PlatformDescriptor, ProbeDescriptor, ProbeState};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const PLATFORM_ID: &str = "evm";
const WEI_PER_ETH: f64 = 1e18;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvmPlatformConfig {
    #[serde(default)]
    resilience: ResilienceConfig,
}

/// EVM-compatible chain family speaking JSON-RPC over HTTP.
///
/// All probes of one RPC URL share a breaker, so a dead node trips once and
/// every probe backs off together.
pub struct EvmPlatform {
    client: reqwest::Client,
    upstreams: RwLock<Arc<UpstreamMap>>,
}

impl EvmPlatform {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
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

impl Default for EvmPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for EvmPlatform {
    fn describe(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            id: PLATFORM_ID.to_string(),
            display_name: "EVM JSON-RPC".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            supported_probe_types: vec!["block".to_string(), "balance".to_string()],
        }
    }

    async fn initialize(&self, config: &Value) -> Result<()> {
        if config.is_null() {
            return Ok(());
        }
        let cfg: EvmPlatformConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid evm platform config: {e}"))?;
        let mut guard = self
            .upstreams
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(UpstreamMap::new(cfg.resilience));
        Ok(())
    }

    fn create_probe(&self, descriptor: &ProbeDescriptor) -> Result<Box<dyn Probe>> {
        match descriptor.probe_type.as_str() {
            "block" => {
                let cfg: BlockConfig = serde_json::from_value(descriptor.config.clone())
                    .map_err(|e| anyhow::anyhow!("probe '{}': invalid config: {e}", descriptor.id))?;
                let upstream = self.upstreams().get_or_create(&upstream_key(&cfg.rpc_url));
                Ok(Box::new(BlockProbe {
                    rpc: RpcClient {
                        client: self.client.clone(),
                        upstream,
                        url: cfg.rpc_url,
                    },
                }))
            }
            "balance" => {
                let cfg: BalanceConfig = serde_json::from_value(descriptor.config.clone())
                    .map_err(|e| anyhow::anyhow!("probe '{}': invalid config: {e}", descriptor.id))?;
                let upstream = self.upstreams().get_or_create(&upstream_key(&cfg.rpc_url));
                Ok(Box::new(BalanceProbe {
                    rpc: RpcClient {
                        client: self.client.clone(),
                        upstream,
                        url: cfg.rpc_url,
                    },
                    address: cfg.address,
                }))
            }
            other => anyhow::bail!("probe type '{other}' is not supported by the evm platform"),
        }
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.upstreams().all_healthy().await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockConfig {
    rpc_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BalanceConfig {
    rpc_url: String,
    address: String,
}

struct RpcClient {
    client: reqwest::Client,
    upstream: Arc<Upstream>,
    url: String,
}

impl RpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, BreakerError> {
        self.upstream
            .run(|| async {
                let response = self
                    .client
                    .post(&self.url)
                    .json(&json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": method,
                        "params": params,
                    }))
                    .send()
                    .await
                    .with_context(|| format!("POST {} failed", self.url))?;
                let body: Value = response
                    .json()
                    .await
                    .context("invalid JSON-RPC response body")?;
                if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
                    anyhow::bail!("{method} returned RPC error: {err}");
                }
                body.get("result")
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("{method} response missing result"))
            })
            .await
    }
}

/// Parses a `0x`-prefixed hex quantity. Covers 256-bit-ish magnitudes far
/// beyond any realistic block number or balance.
fn parse_hex_quantity(value: &Value) -> Result<i128> {
    let text = value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("expected hex string, got {value}"))?;
    let digits = text.trim_start_matches("0x");
    i128::from_str_radix(digits, 16).with_context(|| format!("malformed hex quantity '{text}'"))
}

fn degraded_facts(facts: &mut Facts, key: &str, error: &anyhow::Error) {
    facts.insert(key.to_string(), FactValue::Null);
    facts.insert("evm.status".to_string(), FactValue::Str("error".into()));
    facts.insert("evm.error".to_string(), FactValue::Str(error.to_string()));
}

/// Tracks chain head: `evm.block`, plus `evm.block_delta` against the block
/// seen by the previous run (carried in the probe state namespace).
struct BlockProbe {
    rpc: RpcClient,
}

#[async_trait]
impl Probe for BlockProbe {
    async fn collect(&self, state: &mut ProbeState) -> Result<Facts> {
        let mut facts = Facts::new();
        let result = self.rpc.call("eth_blockNumber", json!([])).await;
        match result {
            Ok(value) => match parse_hex_quantity(&value) {
                Ok(block) => {
                    let block = block as i64;
                    facts.insert("evm.block".to_string(), FactValue::Int(block));
                    if let Some(last) = state.probe.get("last_block").and_then(Value::as_i64) {
                        facts.insert(
                            "evm.block_delta".to_string(),
                            FactValue::Int(block - last),
                        );
                    }
                    state
                        .probe
                        .insert("last_block".to_string(), Value::from(block));
                }
                Err(e) => degraded_facts(&mut facts, "evm.block", &e),
            },
            Err(e @ BreakerError::Open { .. }) => return Err(e.into()),
            Err(BreakerError::Upstream(e)) => {
                tracing::warn!(url = %self.rpc.url, error = %e, "Block number request failed");
                degraded_facts(&mut facts, "evm.block", &e);
            }
        }
        Ok(facts)
    }
}

/// Watches one account's balance: `evm.balance_wei` (exact) and
/// `evm.balance` (scaled to whole coins for thresholds).
struct BalanceProbe {
    rpc: RpcClient,
    address: String,
}

#[async_trait]
impl Probe for BalanceProbe {
    async fn collect(&self, _state: &mut ProbeState) -> Result<Facts> {
        let mut facts = Facts::new();
        let result = self
            .rpc
            .call("eth_getBalance", json!([self.address, "latest"]))
            .await;
        match result {
            Ok(value) => match parse_hex_quantity(&value) {
                Ok(wei) => {
                    facts.insert("evm.balance_wei".to_string(), FactValue::BigInt(wei));
                    facts.insert(
                        "evm.balance".to_string(),
                        FactValue::Float(wei as f64 / WEI_PER_ETH),
                    );
                }
                Err(e) => degraded_facts(&mut facts, "evm.balance", &e),
            },
            Err(e @ BreakerError::Open { .. }) => return Err(e.into()),
            Err(BreakerError::Upstream(e)) => {
                tracing::warn!(
                    url = %self.rpc.url,
                    address = %self.address,
                    error = %e,
                    "Balance request failed"
                );
                degraded_facts(&mut facts, "evm.balance", &e);
            }
        }
        Ok(facts)
    }
}
