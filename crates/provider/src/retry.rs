//! Bounded exponential backoff for `Transient`/`RateLimited` provider errors (§4.2:
//! "retried internally with bounded exponential backoff (e.g., 3 attempts,
//! 250 ms -> 2 s, jitter)").

use std::future::Future;
use std::time::Duration;

use crate::ProviderError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 2_000;

pub async fn with_retry<F, Fut, T>(mut call: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let backoff_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                let jitter_ms = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
