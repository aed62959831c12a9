use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Trailing-window rate limiter: at most `max_requests` acquisitions per
/// `window`, scoped to one logical upstream.
///
/// `acquire` blocks until a slot frees up; callers queue on the internal
/// mutex, which gives first-come-first-served ordering.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until the caller may issue one upstream request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while stamps
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
                {
                    stamps.pop_front();
                }

                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }

                // Sleep until the oldest in-window stamp ages out, then
                // re-check; another caller may take the slot first.
                let oldest = *stamps.front().expect("non-empty at capacity");
                self.window - now.duration_since(oldest)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_up_to_cap() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_until_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));

        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // The third acquisition had to wait for the first stamp to age out.
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn separate_limiters_do_not_interact() {
        let a = RateLimiter::new(1, Duration::from_secs(60));
        let b = RateLimiter::new(1, Duration::from_secs(60));

        let start = Instant::now();
        a.acquire().await;
        b.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
