//! Per-call timeout and retry policy for provider and executor calls

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration for external calls.
///
/// Only timeouts are retried unless `retry_errors` is set. A policy with
/// `max_attempts == 1` never retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for the delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier (1.0 = fixed delay)
    pub multiplier: f64,

    /// Also retry calls that returned an error, not only timeouts
    pub retry_errors: bool,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            retry_errors: false,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            retry_errors: false,
        }
    }

    pub fn backoff(max_attempts: u32, initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay: initial,
            max_delay: max,
            multiplier,
            retry_errors: false,
        }
    }

    pub fn with_retry_errors(mut self, retry_errors: bool) -> Self {
        self.retry_errors = retry_errors;
        self
    }

    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Timeout plus retry for one kind of external call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPolicy {
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl CallPolicy {
    pub fn new(timeout: Option<Duration>, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

/// Why a policy-wrapped call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError<E> {
    /// The last attempt exceeded the timeout
    Timeout(Duration),
    /// The last attempt returned an error
    Failed(E),
    /// Cancellation was requested before the first attempt started
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
            CallError::Failed(e) => write!(f, "{e}"),
            CallError::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Run `call` under `policy`.
///
/// An attempt that has started is always allowed to finish (or time out);
/// cancellation is only observed before an attempt and while waiting
/// between attempts. `call` receives the 1-based attempt number.
pub async fn call_with_policy<T, E, F, Fut>(
    policy: &CallPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, CallError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    if cancel.is_cancelled() {
        return Err(CallError::Cancelled);
    }

    let max_attempts = policy.retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, call(attempt)).await {
                Ok(result) => result.map_err(CallError::Failed),
                Err(_) => Err(CallError::Timeout(limit)),
            },
            None => call(attempt).await.map_err(CallError::Failed),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let retryable = match &err {
            CallError::Timeout(_) => true,
            CallError::Failed(_) => policy.retry.retry_errors,
            CallError::Cancelled => false,
        };
        if !retryable || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.retry.delay_for_attempt(attempt - 1);
        tracing::warn!(
            attempt,
            max_attempts,
            error = %err,
            "call failed, retrying in {}ms",
            delay.as_millis()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
