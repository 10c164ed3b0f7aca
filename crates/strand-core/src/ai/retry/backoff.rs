use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Errors that know whether another attempt could succeed
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;

    /// Canceled / deadline-exceeded errors. Never retried.
    fn is_cancellation(&self) -> bool {
        false
    }

    /// Server-provided minimum wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Status codes treated as transient.
///
/// NOTE: the whole 400-599 range is retried, including 400/401/404. Threads can
/// narrow this with their own classifier.
pub fn is_retryable_status(status: u16) -> bool {
    (400..600).contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Retry settings. `attempts == 0` disables retry entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff: BackoffKind::Exponential,
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms;
        let ms = match self.backoff {
            BackoffKind::Fixed => initial,
            BackoffKind::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                initial.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Failure of a retried operation
#[derive(Debug)]
pub enum RetryError<E> {
    /// Retry was disabled; the operation's own error, untouched
    Passthrough(E),
    /// All permitted attempts failed, or a non-retryable error ended the run
    Exhausted { attempts: usize, errors: Vec<E> },
    /// Caller cancelled while waiting between attempts
    Cancelled { attempts: usize, errors: Vec<E> },
}

impl<E> RetryError<E> {
    /// Number of times the operation ran
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Passthrough(_) => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Most recent underlying error
    pub fn last(&self) -> Option<&E> {
        match self {
            RetryError::Passthrough(e) => Some(e),
            RetryError::Exhausted { errors, .. } | RetryError::Cancelled { errors, .. } => {
                errors.last()
            }
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Passthrough(e) => write!(f, "{}", e),
            RetryError::Exhausted { attempts, errors } => {
                write!(
                    f,
                    "all {} retry attempts failed, original errors: [",
                    attempts
                )?;
                write_joined(f, errors)?;
                write!(f, "]")
            }
            RetryError::Cancelled { attempts, errors } => {
                write!(f, "cancelled after {} attempts, errors: [", attempts)?;
                write_joined(f, errors)?;
                write!(f, "]")
            }
        }
    }
}

fn write_joined<E: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    errors: &[E],
) -> std::fmt::Result {
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            write!(f, "; ")?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Retry `op` using the error's own `IsRetryable` classification
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, RetryError<E>>
where
    E: IsRetryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, cancel, |e: &E| e.is_retryable(), op).await
}

/// Retry `op` while `classify` reports the error as retryable.
///
/// With `attempts == 0` the operation runs once and its error is returned as
/// `RetryError::Passthrough`. Cancellation errors stop immediately.
pub async fn with_retry_if<T, E, F, Fut, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classify: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: IsRetryable + std::fmt::Display,
    C: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if config.attempts == 0 {
        return op().await.map_err(RetryError::Passthrough);
    }

    let max_attempts = config.attempts;
    let mut errors = Vec::new();

    for attempt in 1..=max_attempts {
        tracing::debug!(attempt, max_attempts, "Running provider call");

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let retryable = !err.is_cancellation() && classify(&err);
        let retry_after = err.retry_after();
        errors.push(err);

        if !retryable || attempt == max_attempts {
            break;
        }

        let mut delay = config.delay_for(attempt);
        if let Some(hint) = retry_after {
            delay = delay.max(hint).min(Duration::from_millis(config.max_delay_ms));
        }

        if let Some(last) = errors.last() {
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "Retrying provider call"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: errors.len(),
                    errors,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Err(RetryError::Exhausted {
        attempts: errors.len(),
        errors,
    })
}
