pub mod breaker;
pub mod limiter;

pub use breaker::{BreakerError, BreakerMetrics, BreakerState, CircuitBreaker};
pub use limiter::RateLimiter;

use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tunables for the per-upstream breaker + limiter pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max_attempts: default_half_open_max_attempts(),
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_attempts() -> u32 {
    2
}

fn default_max_requests() -> usize {
    30
}

fn default_window_secs() -> u64 {
    60
}

/// One logical upstream's protection: rate limiter in front of the breaker.
pub struct Upstream {
    pub breaker: CircuitBreaker,
    pub limiter: RateLimiter,
}

impl Upstream {
    fn new(key: &str, cfg: &ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                key,
                cfg.failure_threshold,
                Duration::from_secs(cfg.reset_timeout_secs),
                cfg.half_open_max_attempts,
            ),
            limiter: RateLimiter::new(cfg.max_requests, Duration::from_secs(cfg.window_secs)),
        }
    }

    /// Awaits a rate-limit slot, then runs `op` under the circuit breaker.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.limiter.acquire().await;
        self.breaker.execute(op).await
    }
}

/// Lazily-built map from upstream key (hostname or RPC URL) to its
/// [`Upstream`]. Platforms share one map so every probe of a platform hits
/// the same breaker for the same host.
pub struct UpstreamMap {
    config: ResilienceConfig,
    inner: Mutex<HashMap<String, Arc<Upstream>>>,
}

impl UpstreamMap {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, key: &str) -> Arc<Upstream> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Upstream::new(key, &self.config)))
            .clone()
    }

    fn snapshot_upstreams(&self) -> Vec<(String, Arc<Upstream>)> {
        let map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Breaker diagnostics for every upstream seen so far.
    pub async fn metrics(&self) -> HashMap<String, BreakerMetrics> {
        let mut out = HashMap::new();
        for (key, upstream) in self.snapshot_upstreams() {
            out.insert(key, upstream.breaker.metrics().await);
        }
        out
    }

    /// True when no known upstream currently has an open breaker.
    pub async fn all_healthy(&self) -> bool {
        for (_, upstream) in self.snapshot_upstreams() {
            if upstream.breaker.state().await == BreakerState::Open {
                return false;
            }
        }
        true
    }
}

/// Upstream key for an HTTP(S) URL: scheme-less host plus port when present.
pub fn upstream_key(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("wss://")
        .trim_start_matches("ws://");
    match trimmed.split_once('/') {
        Some((host, _)) => host.to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_key_strips_scheme_and_path() {
        assert_eq!(upstream_key("https://rpc.ankr.com/eth"), "rpc.ankr.com");
        assert_eq!(upstream_key("http://localhost:8545"), "localhost:8545");
        assert_eq!(upstream_key("api.example.com/v2/x"), "api.example.com");
    }

    #[tokio::test]
    async fn map_reuses_upstream_per_key() {
        let map = UpstreamMap::new(ResilienceConfig::default());
        let a = map.get_or_create("rpc.ankr.com");
        let b = map.get_or_create("rpc.ankr.com");
        let c = map.get_or_create("other.example.com");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn open_breaker_flips_health() {
        let map = UpstreamMap::new(ResilienceConfig {
            failure_threshold: 1,
            ..ResilienceConfig::default()
        });
        assert!(map.all_healthy().await);

        let upstream = map.get_or_create("bad.example.com");
        let _ = upstream
            .run(|| async { Err::<(), _>(anyhow::anyhow!("down")) })
            .await;

        assert!(!map.all_healthy().await);
        let metrics = map.metrics().await;
        assert_eq!(metrics["bad.example.com"].state, BreakerState::Open);
    }
}
