//! Bounded retry with exponential delay for transient upstream failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{Error, Result};

pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub(crate) const RETRY_FACTOR: u32 = 2;

/// Run `op` up to [`MAX_RETRIES`] times, sleeping `500ms, 1s, …` between
/// attempts, retrying only while `should_retry` accepts the error.
pub(crate) async fn retry_operation<T, F, Fut>(
    operation: &str,
    context: &str,
    mut op: F,
    should_retry: impl Fn(&Error) -> bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = RETRY_INITIAL_DELAY;
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && should_retry(&err) => {
                tracing::warn!(
                    operation,
                    context,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                sleep(delay).await;
                delay *= RETRY_FACTOR;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Default predicate for block and transaction fetches: upstream nodes report
/// transiently missing data with these message fragments.
pub(crate) fn transient_fetch_error(err: &Error) -> bool {
    let message = err.message();
    message.contains("not found") || message.contains("transaction type not supported")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let started = Instant::now();

        let result = retry_operation(
            "get_block",
            "12345",
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::rpc("block 12345 not found"))
                    } else {
                        Ok(42u64)
                    }
                }
            },
            transient_fetch_error,
        )
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 500ms + 1s of growing delay.
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u64> = retry_operation(
            "get_block",
            "12345",
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::rpc("block 12345 not found"))
                }
            },
            transient_fetch_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_do_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u64> = retry_operation(
            "get_block",
            "0xdead",
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::new(ErrorCode::InvalidBlockIdentifier, "bad identifier"))
                }
            },
            transient_fetch_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transaction_type_errors_are_transient() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_operation(
            "get_block",
            "latest",
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::rpc("transaction type not supported"))
                    } else {
                        Ok(())
                    }
                }
            },
            transient_fetch_error,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
