// SPDX-License-Identifier: MIT
//! Exponential backoff retry for outbound time-tracking API calls.
//!
//! [`retry_with_backoff`] retries a fallible async operation with
//! exponentially increasing delays. The caller supplies a classifier that
//! decides, per error, whether another attempt is worthwhile and whether the
//! server dictated a delay (`Retry-After` on a 429).

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The error cannot be cured by retrying (4xx, validation, …).
    Fatal,
    /// Retry after the computed backoff delay.
    Retry,
    /// Retry after a server-provided delay (milliseconds), capped by config.
    RetryAfterMs(u64),
}

/// Backoff bounds, derived from [`RetrySettings`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum attempts, including the first try.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed backoff delay.
    pub max_delay: Duration,
    /// Upper bound honored for a server-provided `Retry-After`.
    pub retry_after_cap: Duration,
}

impl From<&RetrySettings> for BackoffConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            retry_after_cap: Duration::from_millis(s.retry_after_cap_ms),
        }
    }
}

impl BackoffConfig {
    /// Config suitable for quick unit tests (no real waiting).
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            retry_after_cap: Duration::from_millis(5),
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    fn delay_for(&self, attempt: u32, decision: RetryDecision) -> Duration {
        if let RetryDecision::RetryAfterMs(ms) = decision {
            return Duration::from_millis(ms).min(self.retry_after_cap);
        }
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        backoff.min(self.max_delay)
    }
}

/// Retry an async operation with exponential backoff.
///
/// Calls `f()` up to `config.max_attempts` times. After each failure the
/// error is classified: `Fatal` returns immediately, the retry variants wait
/// for the computed (or server-provided) delay before the next attempt.
/// Returns `Ok` on the first success, or the last error once attempts are
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &BackoffConfig,
    classify: impl Fn(&E) -> RetryDecision,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                let decision = classify(&e);
                if decision == RetryDecision::Fatal || attempt == max_attempts {
                    if attempt == max_attempts && decision != RetryDecision::Fatal {
                        warn!(attempt, max = max_attempts, err = %e, "all retry attempts exhausted");
                    }
                    return Err(e);
                }
                let delay = config.delay_for(attempt, decision);
                warn!(
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis(),
                    err = %e,
                    "attempt failed — retrying"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
        }
    }

    // Unreachable: the loop either returns Ok or returns the final Err above.
    Err(last_err.unwrap())
}
