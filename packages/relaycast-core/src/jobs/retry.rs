//! Exponential-backoff retry helper for external calls made from pipeline
//! stages.
//!
//! A closure producing a fresh attempt each call, a fixed delay schedule,
//! and a retriable/non-retriable split driven by the error itself rather
//! than by the call site.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::RelayError;
use crate::protocol_constants::{MAX_RETRY_ATTEMPTS, RETRY_DELAYS_SECS};

/// Calls `attempt` up to [`MAX_RETRY_ATTEMPTS`] times. Retries only when the
/// returned error is [`RelayError::is_transient`]; any non-retriable error
/// (or exhausting all attempts) is returned to the caller immediately.
///
/// Delays between attempts follow [`RETRY_DELAYS_SECS`] — the Nth retry
/// waits `RETRY_DELAYS_SECS[N-1]` seconds beforehand.
pub async fn with_retry<T, F, Fut>(mut attempt: F) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut last_err = None;
    for attempt_index in 0..MAX_RETRY_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }
                last_err = Some(err);
                if let Some(&delay_secs) = RETRY_DELAYS_SECS.get(attempt_index as usize) {
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Like [`with_retry`], but increments `attempts` once per call to
/// `attempt` — used so a [`crate::store::Job`] record can expose the exact
/// attempt count a stage's provider call took (seed scenario: two 503s then
/// success yields `attempt_count == 3`).
pub async fn with_retry_counted<T, F, Fut>(attempts: &AtomicU32, mut attempt: F) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut last_err = None;
    for attempt_index in 0..MAX_RETRY_ATTEMPTS {
        attempts.fetch_add(1, Ordering::SeqCst);
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }
                last_err = Some(err);
                if let Some(&delay_secs) = RETRY_DELAYS_SECS.get(attempt_index as usize) {
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RelayError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RelayError::ExternalUnavailable("503".into()))
            } else {
                Ok("hello world".to_string())
            }
        })
        .await;
        assert_eq!(result.unwrap(), "hello world");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RelayError> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::ExternalRejected("400".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn counted_retry_reports_exact_attempt_count() {
        let calls = AtomicU32::new(0);
        let attempts = AtomicU32::new(0);
        let result = with_retry_counted(&attempts, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RelayError::ExternalUnavailable("503".into()))
            } else {
                Ok("hello world".to_string())
            }
        })
        .await;
        assert_eq!(result.unwrap(), "hello world");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RelayError> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::ExternalUnavailable("still down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRY_ATTEMPTS);
    }
}
