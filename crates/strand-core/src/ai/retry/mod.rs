//! Retry logic for provider calls
//!
//! Wraps a fallible async operation with classification-driven retry and
//! fixed or exponential backoff. Cancellation is never retried.

mod backoff;

pub use backoff::{
    is_retryable_status, with_retry, with_retry_if, BackoffKind, IsRetryable, RetryConfig,
    RetryError,
};
