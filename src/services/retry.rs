//! Bounded exponential backoff applied uniformly to every durable-store call.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::dao::storage::{StorageError, StorageResult};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for store calls: attempt budget, doubling delay, optional jitter and a
/// per-attempt timeout. A timed-out attempt counts as a failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed_attempt`-th failure (1-based), before jitter.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let ceiling = delay.as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }

    /// Run `call` until it succeeds or the attempt budget is spent, surfacing the last
    /// error. `call` is invoked once per attempt and must replay the same operation.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match self.call_timeout {
                Some(limit) => match timeout(limit, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Timeout {
                        operation,
                        after: limit,
                    }),
                },
                None => call().await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "storage call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let delay = self.jittered(self.backoff(attempt));
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "storage call failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;
    use crate::dao::session_store::memory::MemoryStoreError;

    fn failure() -> StorageError {
        MemoryStoreError::Poisoned.into()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_secs(2));
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = RetryPolicy::default()
            .run("insert", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failure())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: StorageResult<()> = RetryPolicy::default()
            .run("insert", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failure())
                }
            })
            .await;

        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempts_count_as_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: StorageResult<()> = RetryPolicy::default()
            .run("insert", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    futures::future::pending::<StorageResult<()>>().await
                }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // three 10s timeouts plus 1s and 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(33));
    }
}
