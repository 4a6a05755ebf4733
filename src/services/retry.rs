//! Bounded retry for transient ledger failures

use std::{future::Future, time::Duration};

use rand::Rng;

use crate::{config::RetryConfig, error::AppResult};

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)` plus up to
/// half of that again as jitter
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let base = config.base_delay_ms.saturating_mul(1u64 << exp);
    let jitter = if base > 1 {
        rand::thread_rng().gen_range(0..=base / 2)
    } else {
        0
    };
    Duration::from_millis(base + jitter)
}

/// Runs `op` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is reached
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
