//! Retry with exponential backoff and jitter.
//!
//! Component actions talk to cloud APIs that fail transiently (quota,
//! rate limits, eventual consistency). The scheduler wraps each action in
//! [`retry_with_backoff`]; the surrounding deadline still bounds the total.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::policy::RetryPolicy;

/// Runs `operation` until it succeeds, the error is not retryable, or the
/// policy's attempt budget is spent.
///
/// Delays are jittered between 0.5x and 1.5x of the policy's backoff to
/// avoid synchronized retries across independent branches.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let budget = policy.attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= budget || !is_retryable(&e) {
                    debug!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "giving up"
                    );
                    return Err(e);
                }

                let delay = jitter(policy.backoff_after(attempt));
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
