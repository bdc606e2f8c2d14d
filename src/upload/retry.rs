//! Bounded retries with exponential backoff

use std::future::Future;
use std::time::Duration;

/// Retry an operation up to `max_attempts` times.
///
/// After the n-th failure (n < `max_attempts`) the policy sleeps
/// `base_delay * 2^n` before trying again: 2 s then 4 s with the default
/// one second base. The failure of the last attempt is returned unchanged.
/// No jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` of 0 is treated as 1
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep that follows the `failures`-th failed attempt
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures);
        self.base_delay.saturating_mul(factor)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_notify(operation, |_, _, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_retry(error, failures, delay)`
    /// before every backoff sleep.
    pub async fn run_notify<T, E, F, Fut, N>(
        &self,
        mut operation: F,
        mut on_retry: N,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, u32, Duration),
    {
        let mut failures = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff(failures);
                    on_retry(&err, failures, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(super::MAX_RETRIES, Duration::from_secs(1))
    }
}
