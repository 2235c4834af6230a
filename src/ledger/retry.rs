//! Retry Policy
//!
//! Exponential backoff with jitter for ledger reads. Only failures the error
//! taxonomy marks retryable are attempted again.

use rand::{thread_rng, Rng};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::LedgerResult;

/// Exponential backoff budget for retryable ledger reads.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::exponential(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u128 << shift;
        let scaled = self.base_delay.as_millis().saturating_mul(factor);
        let raw = Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64);
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            bounded
        } else {
            let jitter = self.jitter_fraction.min(1.0);
            let factor = thread_rng().gen_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
            let jittered = (bounded.as_millis() as f64 * factor).round().max(0.0);
            Duration::from_millis(jittered.min(u64::MAX as f64) as u64)
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, self.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(200)).with_max_delay(Duration::from_secs(5))
    }
}
