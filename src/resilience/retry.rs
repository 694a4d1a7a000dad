//! Retry logic.
//!
//! Automatic retry with backoff for transient failures. Callers classify
//! each error into a [`RetryDecision`]; only errors classified as retryable
//! consume another attempt, and provider reset hints override the computed
//! backoff.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use editorial_orchestrator::resilience::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::exponential_capped(3, Duration::from_millis(100), Duration::from_secs(5));
//! let outcome = policy
//!     .retry_classified(|| provider.generate(&request), |e| {
//!         if e.is_retryable() { RetryDecision::Retry } else { RetryDecision::Stop }
//!     })
//!     .await;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, first try included. Zero is treated as one.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub strategy: RetryStrategy,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

/// Retry backoff strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff (delay doubles each time).
    Exponential {
        /// Delay before the second attempt.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// How the caller wants a failed attempt handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the policy's computed delay.
    Retry,
    /// Retry after at least this long (provider reset hint).
    RetryAfter(Duration),
    /// Do not retry; return the error now.
    Stop,
}

/// Final error of a retried operation plus the attempts spent on it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    /// Error of the last attempt.
    pub error: E,
    /// Attempts made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Create policy with fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
            jitter: false,
        }
    }

    /// Create policy with exponential backoff and an explicit cap.
    pub fn exponential_capped(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier: 2.0,
            },
            jitter: false,
        }
    }

    /// Enable jitter.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Execute with retries, consulting `classify` after every failure.
    ///
    /// # Errors
    ///
    /// Returns [`RetryFailure`] with the last error and the attempt count when
    /// `classify` says [`RetryDecision::Stop`] or attempts are exhausted.
    pub async fn retry_classified<F, Fut, T, E, C>(
        &self,
        mut f: F,
        mut classify: C,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        C: FnMut(&E) -> RetryDecision,
        E: std::fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max, "retry: attempting operation");

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "retry: operation succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let decision = classify(&e);
                    if decision == RetryDecision::Stop {
                        warn!(attempt, error = %e, "retry: error is not retryable");
                        return Err(RetryFailure { error: e, attempts: attempt });
                    }
                    if attempt >= max {
                        warn!(attempts = attempt, error = %e, "retry: all attempts exhausted");
                        return Err(RetryFailure { error: e, attempts: attempt });
                    }

                    let mut delay = self.calculate_delay(attempt);
                    if let RetryDecision::RetryAfter(hint) = decision {
                        delay = delay.max(hint);
                    }
                    warn!(
                        attempt,
                        max,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retry: operation failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delay before attempt `attempt + 1`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let delay = initial_delay.as_millis() as f64
                    * multiplier.powi(attempt.saturating_sub(1).min(31) as i32);
                let capped = delay.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        };
        if self.jitter {
            with_jitter(base)
        } else {
            base
        }
    }
}

/// Add up to 25% random jitter to prevent thundering herd.
pub fn with_jitter(duration: Duration) -> Duration {
    use rand::Rng;
    let quarter = (duration.as_millis() / 4) as u64;
    if quarter == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0..=quarter);
    duration + Duration::from_millis(jitter)
}
