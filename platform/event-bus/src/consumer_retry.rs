//! Consumer retry logic with exponential backoff and jitter
//!
//! Every attempt runs under a timeout; a timed-out attempt counts as a
//! failed attempt. Non-retryable errors stop the loop immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::EventError;

/// Randomisation applied to each computed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as is
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// Uniform in `[delay / 2, delay]`
    Equal,
}

/// How long to wait before the next attempt
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: Jitter,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the delay after failed attempt `attempt` (1-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential {
                initial,
                max,
                multiplier,
                ..
            } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let millis = initial.as_millis() as f64 * multiplier.powi(exponent);
                let capped = millis.min(max.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }

    /// Delay to sleep after failed attempt `attempt`, jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let jitter = match self {
            BackoffPolicy::Fixed(_) => Jitter::None,
            BackoffPolicy::Exponential { jitter, .. } => *jitter,
        };

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }

        let mut rng = rand::thread_rng();
        match jitter {
            Jitter::None => ceiling,
            Jitter::Full => Duration::from_millis(rng.gen_range(0..=ceiling_ms)),
            Jitter::Equal => {
                let half = ceiling_ms / 2;
                Duration::from_millis(half + rng.gen_range(0..=ceiling_ms - half))
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Budget for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Longest wall-clock time one event can spend under this policy:
    /// every attempt timing out plus the largest backoff between attempts
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let running = self.attempt_timeout.saturating_mul(attempts);
        (1..attempts).fold(running, |total, attempt| {
            total.saturating_add(self.backoff.ceiling(attempt))
        })
    }

    /// How long a processing claim (or an unacknowledged transport
    /// delivery) must stay exclusive so it never expires while its retries
    /// are still running
    pub fn claim_lease(&self) -> Duration {
        self.worst_case_duration().saturating_add(CLAIM_LEASE_MARGIN)
    }
}

/// Slack added on top of the retry budget for storage and commit calls
pub const CLAIM_LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Terminal failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    /// Attempts actually made
    pub attempts: u32,
    pub last_error: EventError,
}

/// Retry a fallible async operation with backoff
///
/// `operation` receives the 1-based attempt number.
///
/// # Returns
/// * `Ok((T, attempts))` on the first successful attempt
/// * `Err(RetryExhausted)` once `max_attempts` is reached or a
///   non-retryable error occurs
///
/// # Example
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
/// use event_bus::EventError;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RetryConfig::default();
/// let (value, attempts) = retry_with_backoff(
///     |_attempt| async { Ok::<_, EventError>(42) },
///     &config,
///     "example_operation",
/// )
/// .await
/// .map_err(|e| e.last_error)?;
/// assert_eq!((value, attempts), (42, 1));
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EventError>>,
{
    retry_with_backoff_observed(operation, config, context, |_, _| async {}).await
}

/// [`retry_with_backoff`], calling `on_failure` after every failed attempt
/// (timeouts included) before any backoff sleep
///
/// `on_failure` receives the 1-based attempt number and its error.
pub async fn retry_with_backoff_observed<F, Fut, T, O, OFut>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
    mut on_failure: O,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EventError>>,
    O: FnMut(u32, EventError) -> OFut,
    OFut: Future<Output = ()>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match timeout(config.attempt_timeout, operation(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(EventError::HandlerTimeout {
                timeout_ms: config.attempt_timeout.as_millis() as u64,
            }),
        };

        if let Err(e) = &outcome {
            on_failure(attempt, e.clone()).await;
        }

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok((result, attempt));
            }
            Err(e) if !e.is_retryable() => {
                warn!(
                    context = %context,
                    attempt = attempt,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let backoff = config.backoff.delay_for(attempt);
                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(backoff).await;
            }
        }
    }
}
