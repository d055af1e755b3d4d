//! Retry with linear backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::InstallTuning;
use crate::error::InstallResult;

/// Delay in milliseconds before retry `attempt`.
///
/// `max(1, attempt) * backoff_ms + floor(random() * (jitter_ms + 1))`; the
/// jitter term is skipped entirely when `jitter_ms <= 0`. `random` must
/// return a value in `[0, 1)`.
pub fn compute_backoff_delay<R>(attempt: u32, backoff_ms: i64, jitter_ms: i64, random: R) -> u64
where
    R: FnOnce() -> f64,
{
    let base = u64::from(attempt.max(1)).saturating_mul(backoff_ms.max(0) as u64);
    if jitter_ms <= 0 {
        return base;
    }
    let jitter = (random() * (jitter_ms as f64 + 1.0)).floor() as u64;
    base.saturating_add(jitter)
}

/// Retry policy for network operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
    pub jitter_ms: u64,
}

impl From<InstallTuning> for RetryPolicy {
    fn from(tuning: InstallTuning) -> Self {
        Self {
            attempts: tuning.retry_attempts,
            backoff_ms: tuning.backoff_ms,
            jitter_ms: tuning.backoff_jitter_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff_delay(
            attempt,
            self.backoff_ms as i64,
            self.jitter_ms as i64,
            rand::random::<f64>,
        ))
    }

    /// Run `operation` up to `attempts` times.
    ///
    /// Only retriable (transient network) errors are retried; anything else,
    /// and the last failure once attempts are exhausted, is returned as is.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> InstallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InstallResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= attempts || !error.is_retriable() {
                        return Err(error);
                    }

                    let delay = self.delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "{label} failed, retrying ({attempt}/{attempts})"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
