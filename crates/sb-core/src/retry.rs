//! Retry policy for outbound vendor calls.
//!
//! Every leaf connector wraps its HTTP calls in a [`RetryPolicy`]: a bounded
//! number of attempts, a backoff function, and a predicate deciding which
//! errors are worth another try. On exhaustion the caller either propagates
//! the final error ([`RetryPolicy::run`]) or degrades to a best-effort value
//! ([`RetryPolicy::run_or_partial`]).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};

/// Decides whether an error should be retried.
pub type RetryPredicate = Arc<dyn Fn(&ConnectorError) -> bool + Send + Sync>;

/// Upper bound applied to server-provided `Retry-After` hints by default.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `initial * multiplier^retry`, capped at `max`, optionally with up to 25% jitter.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Calculates the delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                let base = initial.as_millis() as f64 * multiplier.powi(retry as i32);
                let capped = base.min(max.as_millis() as f64);
                let delayed = if *jitter {
                    capped * (1.0 + rand::thread_rng().gen::<f64>() * 0.25)
                } else {
                    capped
                };
                Duration::from_millis(delayed as u64)
            }
        }
    }
}

/// A reusable retry policy: attempt budget, backoff, and retryable predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    retryable: RetryPredicate,
    max_retry_after: Duration,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("max_retry_after", &self.max_retry_after)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rate_limited()
    }
}

impl RetryPolicy {
    /// Creates a policy that retries HTTP 429 only.
    ///
    /// `max_attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self::on_statuses(max_attempts, backoff, &[429])
    }

    /// The default convention: three attempts on HTTP 429 with exponential backoff.
    pub fn rate_limited() -> Self {
        Self::new(3, Backoff::default())
    }

    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Retries errors whose status code is one of `statuses`.
    pub fn on_statuses(max_attempts: u32, backoff: Backoff, statuses: &[u16]) -> Self {
        let statuses = statuses.to_vec();
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable: Arc::new(move |err: &ConnectorError| {
                err.status_code()
                    .map(|status| statuses.contains(&status))
                    .unwrap_or(false)
            }),
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }

    /// Replaces the retryable predicate.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ConnectorError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Caps how long a server-provided `Retry-After` hint may delay a retry.
    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Returns true if the policy would retry this error.
    pub fn is_retryable(&self, error: &ConnectorError) -> bool {
        (self.retryable)(error)
    }

    /// Delay before retry number `retry`, honoring a capped `Retry-After` hint.
    pub fn delay_for(&self, retry: u32, error: &ConnectorError) -> Duration {
        match error.retry_after() {
            Some(hint) if !hint.is_zero() => hint.min(self.max_retry_after),
            _ => self.backoff.delay(retry),
        }
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The final error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        self.run_inner(operation, f).await.map_err(|(err, _)| err)
    }

    /// Like [`run`](Self::run), but returns `fallback` when the attempt budget
    /// is exhausted on a retryable error. Non-retryable errors still propagate.
    pub async fn run_or_partial<F, Fut, T>(
        &self,
        operation: &str,
        f: F,
        fallback: T,
    ) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        match self.run_inner(operation, f).await {
            Ok(value) => Ok(value),
            Err((err, true)) => {
                warn!(
                    operation = %operation,
                    error = %err,
                    "Retries exhausted, returning partial result"
                );
                Ok(fallback)
            }
            Err((err, false)) => Err(err),
        }
    }

    /// Returns the final error and whether it was a retryable one.
    async fn run_inner<F, Fut, T>(
        &self,
        operation: &str,
        mut f: F,
    ) -> Result<T, (ConnectorError, bool)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = %operation,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = self.is_retryable(&err);
                    if !retryable || attempt >= self.max_attempts {
                        if attempt > 1 {
                            warn!(
                                operation = %operation,
                                attempts = attempt,
                                error = %err,
                                "Operation failed after retries"
                            );
                        }
                        return Err((err, retryable));
                    }

                    let delay = self.delay_for(attempt - 1, &err);
                    warn!(
                        operation = %operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable error, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
