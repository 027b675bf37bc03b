use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::domain::repositories::StoreResult;

/// Exponential backoff `min(max, base · 2^attempt)` with up to 20% random jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Short retries for a busy or momentarily locked store.
    pub fn store() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            max_attempts: 6,
        }
    }

    /// Restart backoff of the execution host.
    pub fn restart(max: Duration) -> Self {
        Self {
            base: Duration::from_secs(1),
            max,
            max_attempts: u32::MAX,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter_ms = (delay.as_millis() as u64) / 5;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Runs `operation`, retrying transient store failures (busy, locked, I/O) with backoff.
pub async fn with_store_retry<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_with_jitter(attempt);
                warn!("{} failed ({}); retrying in {:?}", what, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
