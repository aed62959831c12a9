use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: failure count reaches the threshold
/// - `Open` -> `HalfOpen`: first call after the reset timeout elapses
/// - `HalfOpen` -> `Closed`: enough consecutive successful probes
/// - `HalfOpen` -> `Open`: any single failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Mutable breaker state consolidated under one lock so transitions are
/// atomic.
#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u64,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_successes: 0,
            last_failure: None,
            last_failure_at: None,
            last_state_change: None,
        }
    }

    fn transition(&mut self, to: BreakerState) {
        self.state = to;
        self.last_state_change = Some(Utc::now());
    }
}

/// Diagnostic snapshot exposed through the platform health view.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_state_change: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// Fast-fail while the circuit is open; the wrapped operation was never
    /// invoked and the failure counter did not move.
    #[error("circuit open for {service}, retry in {retry_in_secs}s")]
    Open {
        service: String,
        retry_in_secs: u64,
    },
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// Wraps a failure-prone upstream operation, tripping after a run of
/// consecutive failures and probing recovery through a half-open window.
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        service: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_max_attempts: u32,
    ) -> Self {
        Self {
            service: service.into(),
            failure_threshold,
            reset_timeout,
            half_open_max_attempts,
            inner: RwLock::new(BreakerInner::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Runs `op` under the breaker. While open and inside the reset timeout
    /// this fails fast with [`BreakerError::Open`] without invoking `op`;
    /// any error from `op` itself counts as one failure.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(retry_in) = self.check_open().await {
            return Err(BreakerError::Open {
                service: self.service.clone(),
                retry_in_secs: retry_in.as_secs().max(1),
            });
        }

        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(BreakerError::Upstream(e))
            }
        }
    }

    /// Returns the remaining cool-off when the call must fail fast, `None`
    /// when it may proceed. Handles the open -> half-open transition with a
    /// re-check under the write lock, since another task may have already
    /// moved the state.
    async fn check_open(&self) -> Option<Duration> {
        {
            let inner = self.inner.read().await;
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => return None,
                BreakerState::Open => {
                    let last = inner.last_failure?;
                    let elapsed = last.elapsed();
                    if elapsed < self.reset_timeout {
                        return Some(self.reset_timeout - elapsed);
                    }
                }
            }
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => None,
            BreakerState::Open => {
                let last = inner.last_failure?;
                let elapsed = last.elapsed();
                if elapsed < self.reset_timeout {
                    Some(self.reset_timeout - elapsed)
                } else {
                    inner.transition(BreakerState::HalfOpen);
                    inner.half_open_successes = 0;
                    tracing::warn!(service = %self.service, "Circuit breaker half-open, probing recovery");
                    None
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        inner.success_count += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_max_attempts {
                    inner.transition(BreakerState::Closed);
                    inner.failure_count = 0;
                    inner.last_failure = None;
                    tracing::info!(service = %self.service, "Circuit breaker closed after recovery");
                }
            }
            // A stale task finishing after a reset; nothing to adjust.
            BreakerState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.transition(BreakerState::Open);
                    tracing::warn!(
                        service = %self.service,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.failure_count += 1;
                inner.transition(BreakerState::Open);
                tracing::warn!(service = %self.service, "Circuit breaker re-opened from half-open");
            }
            BreakerState::Open => {}
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    pub async fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.read().await;
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            last_state_change: inner.last_state_change,
        }
    }

    /// Operator override: drop back to closed and forget failures.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        *inner = BreakerInner::new();
        tracing::info!(service = %self.service, "Circuit breaker manually reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "rpc.example.com",
            threshold,
            Duration::from_millis(reset_ms),
            half_open,
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError> {
        b.execute(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .map(|_| ())
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError> {
        b.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn trips_after_exact_threshold() {
        let b = breaker(5, 60_000, 2);

        for _ in 0..4 {
            fail(&b).await.unwrap_err();
            assert_eq!(b.state().await, BreakerState::Closed);
        }
        fail(&b).await.unwrap_err();
        assert_eq!(b.state().await, BreakerState::Open);

        // Sixth call fails fast and names the service.
        let err = succeed(&b).await.unwrap_err();
        match err {
            BreakerError::Open { service, .. } => assert_eq!(service, "rpc.example.com"),
            other => panic!("expected fast-fail, got {other}"),
        }
        // Fast-fail does not count as an additional failure.
        assert_eq!(b.metrics().await.failure_count, 5);
    }

    #[tokio::test]
    async fn success_in_closed_resets_counter() {
        let b = breaker(3, 60_000, 1);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        succeed(&b).await.unwrap();
        assert_eq!(b.metrics().await.failure_count, 0);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_needs_consecutive_successes() {
        let b = breaker(2, 50, 2);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state().await, BreakerState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let b = breaker(2, 50, 2);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state().await, BreakerState::HalfOpen);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn manual_reset_closes() {
        let b = breaker(1, 60_000, 1);

        fail(&b).await.unwrap_err();
        assert_eq!(b.state().await, BreakerState::Open);

        b.reset().await;
        assert_eq!(b.state().await, BreakerState::Closed);
        succeed(&b).await.unwrap();
    }
}
