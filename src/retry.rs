use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;

use crate::error::{HarnessError, Result};

/// Outcome of one attempt of a retried operation.
///
/// `Continue` asks for another attempt, `Stop` ends the loop immediately and
/// hands the error back unchanged (a definitive not-found, a bad request).
#[derive(Debug)]
pub enum Retryable<T> {
    Success(T),
    Continue(HarnessError),
    Stop(HarnessError),
}

impl<T> Retryable<T> {
    /// Classifies a plain result with [`HarnessError::is_retryable`].
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) if e.is_retryable() => Self::Continue(e),
            Err(e) => Self::Stop(e),
        }
    }
}

impl<T> From<Result<T>> for Retryable<T> {
    fn from(result: Result<T>) -> Self {
        Self::from_result(result)
    }
}

/// Bounded exponential backoff.
///
/// Before attempt `n + 1` the engine waits
/// `min(min_timeout * factor^(n - 1), max_timeout)`, multiplied by a random
/// factor in `[1, 2)` first when `randomize` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Additional attempts after the first one
    pub retries: u32,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub factor: f64,
    pub randomize: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 10,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
            factor: 2.0,
            randomize: false,
        }
    }
}

impl RetryOptions {
    pub fn new(retries: u32, min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            retries,
            min_timeout,
            max_timeout,
            ..Self::default()
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.min_timeout.as_secs_f64() * self.factor.max(1.0).powi(exponent);

        if self.randomize {
            secs *= 1.0 + fastrand::f64();
        }

        let max_secs = self.max_timeout.as_secs_f64();
        if !secs.is_finite() || secs > max_secs {
            secs = max_secs;
        }

        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Runs `operation` until it succeeds, stops, or the retry budget runs out.
///
/// Each retry is logged as a warning. See [`retry_with_hook`].
pub async fn retry<T, F, Fut>(operation_name: &str, options: &RetryOptions, operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Retryable<T>>,
{
    retry_with_hook(operation_name, options, operation, |err, attempt, delay| {
        warn!(
            "{operation_name} failed ({err}), retrying in {:.1}s ({attempt}/{})...",
            delay.as_secs_f64(),
            options.retries
        );
    })
    .await
}

/// Runs `operation` with backoff, calling `on_retry` before every wait.
///
/// `operation` receives the 1-based attempt number. It is invoked at most
/// `retries + 1` times; after the last failure the error is wrapped in
/// [`HarnessError::RetriesExhausted`]. A `Stop` returns its error as-is.
/// `on_retry` only observes.
pub async fn retry_with_hook<T, F, Fut, H>(
    operation_name: &str,
    options: &RetryOptions,
    mut operation: F,
    mut on_retry: H,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Retryable<T>>,
    H: FnMut(&HarnessError, u32, Duration),
{
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Retryable::Success(value) => {
                if attempt > 1 {
                    debug!("{operation_name} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Retryable::Stop(err) => {
                debug!("{operation_name} bailed on attempt {attempt}: {err}");
                return Err(err);
            }
            Retryable::Continue(err) => {
                if attempt > options.retries {
                    return Err(HarnessError::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }

                let delay = options.delay_for(attempt);
                on_retry(&err, attempt, delay);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
