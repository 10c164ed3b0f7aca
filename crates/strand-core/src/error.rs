//! Error types for thread operations
//!
//! `ThreadError` is what callers of `Thread` see. Policy blocks, transport
//! failures, cancellation and persistence problems are distinct variants so
//! front-ends can render them differently.

use std::time::Duration;

use thiserror::Error;

use crate::ai::retry::{is_retryable_status, IsRetryable, RetryError};

/// Broad classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The vendor answered with an error status
    Api,
    /// Connection, decoding or stream-level failure
    Transport,
    /// Caller aborted the request
    Canceled,
    /// Request deadline elapsed
    DeadlineExceeded,
}

/// Error surfaced by a provider adapter
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Api,
            message: format!("API error {}: {}", status, message.into()),
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transport,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            kind: ProviderErrorKind::Canceled,
            message: "request canceled".to_string(),
            status: None,
            retry_after: None,
        }
    }

    pub fn deadline_exceeded() -> Self {
        Self {
            kind: ProviderErrorKind::DeadlineExceeded,
            message: "request deadline exceeded".to_string(),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl IsRetryable for ProviderError {
    /// Only vendor status errors are retried; see `is_retryable_status`.
    fn is_retryable(&self) -> bool {
        match self.kind {
            ProviderErrorKind::Api => self.status.map(is_retryable_status).unwrap_or(false),
            _ => false,
        }
    }

    fn is_cancellation(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Canceled | ProviderErrorKind::DeadlineExceeded
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Errors returned by `Thread` operations
#[derive(Debug, Error)]
pub enum ThreadError {
    /// A `user_message_send` hook refused the message
    #[error("message blocked by hook: {reason}")]
    Blocked { reason: String },

    #[error("provider request failed: {0}")]
    Provider(ProviderError),

    /// Every retry attempt failed
    #[error(transparent)]
    RetriesExhausted(RetryError<ProviderError>),

    /// A nested provider call was canceled or timed out
    #[error("operation canceled: {0}")]
    Cancelled(String),

    /// The compaction helper returned nothing usable
    #[error("compaction failed: {0}")]
    Compaction(String),

    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ThreadError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ThreadError::Blocked { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ThreadError::Cancelled(_))
    }
}

impl From<RetryError<ProviderError>> for ThreadError {
    fn from(err: RetryError<ProviderError>) -> Self {
        match err {
            RetryError::Passthrough(e) if e.is_cancellation() => ThreadError::Cancelled(e.message),
            RetryError::Passthrough(e) => ThreadError::Provider(e),
            RetryError::Cancelled { .. } => ThreadError::Cancelled(err.to_string()),
            RetryError::Exhausted { .. } => {
                if err.last().map(|e| e.is_cancellation()).unwrap_or(false) {
                    ThreadError::Cancelled(err.to_string())
                } else {
                    ThreadError::RetriesExhausted(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert!(ProviderError::api(429, "rate limited").is_retryable());
        assert!(ProviderError::api(503, "unavailable").is_retryable());
        assert!(!ProviderError::api(302, "redirect").is_retryable());
        assert!(!ProviderError::transport("reset").is_retryable());
        assert!(ProviderError::canceled().is_cancellation());
        assert!(ProviderError::deadline_exceeded().is_cancellation());
    }

    #[test]
    fn test_canceled_passthrough_maps_to_cancelled() {
        let err: ThreadError = RetryError::Passthrough(ProviderError::canceled()).into();
        assert!(err.is_cancelled());

        let err: ThreadError = RetryError::Passthrough(ProviderError::api(500, "boom")).into();
        assert!(matches!(err, ThreadError::Provider(_)));
    }

    #[test]
    fn test_exhausted_ending_in_cancel_maps_to_cancelled() {
        let err: ThreadError = RetryError::Exhausted {
            attempts: 2,
            errors: vec![ProviderError::api(500, "boom"), ProviderError::canceled()],
        }
        .into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_blocked_message() {
        let err = ThreadError::Blocked {
            reason: "no secrets".into(),
        };
        assert!(err.is_blocked());
        assert_eq!(err.to_string(), "message blocked by hook: no secrets");
    }
}
