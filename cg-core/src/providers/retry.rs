//! Exponential-backoff retry for retriable provider failures.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Retry policy applied to retriable provider calls.
///
/// Defaults match the deployment contract: base 200 ms, factor 2, at most
/// 3 attempts. Non-retriable errors pass through untouched on the first
/// failure.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2,
            max_tries: 3,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base: Duration, max_tries: u32) -> Self {
        Self {
            base,
            factor: 2,
            max_tries: max_tries.max(1),
        }
    }

    /// Run `call` until it succeeds, fails non-retriably, or exhausts the
    /// attempt budget.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.base;
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < self.max_tries => {
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= self.factor;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
