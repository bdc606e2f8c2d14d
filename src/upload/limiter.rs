//! Bounded concurrent execution of upload tasks

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Runs a batch of tasks with at most `max_concurrency` in flight.
///
/// The first `max_concurrency` tasks start immediately; each later task
/// starts as soon as any running task finishes. Results come back in
/// completion order.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimiter {
    max_concurrency: usize,
}

impl ConcurrencyLimiter {
    /// A cap of 0 is treated as 1
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every task, returning all results or the first error.
    ///
    /// On error the tasks still in flight are dropped and the ones not yet
    /// started never run.
    pub async fn run<I, F, Fut, T, E>(&self, tasks: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        stream::iter(tasks)
            .map(|task| task())
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(super::MAX_CONCURRENT_CHUNKS)
    }
}
