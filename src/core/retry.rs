use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// The operation gave up: either the attempt ceiling was reached or the
/// last error was not retryable.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `operation` up to `max_attempts` times, sleeping `backoff * attempt`
/// between tries. The closure receives the 1-based attempt number.
pub async fn with_retries<T, E, F, Fut, R>(
    max_attempts: u32,
    backoff: Duration,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                warn!(attempt, max_attempts, error = %e, "attempt failed, retrying");
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff * attempt).await;
                }
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}
