//! Batch runner.

use crate::cache::CacheableRequest;
use crate::client::{CallOptions, ResilientClient};
use crate::{Error, Result};
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchResult<T, E> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, E)>,
    pub execution_time: Duration,
    pub total_processed: usize,
    pub batches: usize,
}

impl<T, E> BatchResult<T, E> {
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            execution_time: Duration::ZERO,
            total_processed: 0,
            batches: 0,
        }
    }
    pub fn add_success(&mut self, i: usize, r: T) {
        self.successes.push((i, r));
    }
    pub fn add_failure(&mut self, i: usize, e: E) {
        self.failures.push((i, e));
    }
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.successes.len() as f64 / self.total_processed as f64
        }
    }
}

impl<T, E> Default for BatchResult<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Minimum pause between consecutive batches. Not applied after the last.
    pub inter_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            inter_batch_delay: Duration::from_millis(100),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }
}

/// Splits independent work into fixed-size batches run one after another,
/// each batch concurrently.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `f` over every item. Failures are collected per index and never
    /// stop the remaining work.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> BatchResult<R, Error>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let start = Instant::now();
        let total = items.len();
        let size = self.config.batch_size.max(1);
        let mut result = BatchResult::new();
        let mut pending = items.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let chunk: Vec<(usize, T)> = pending.by_ref().take(size).collect();
            result.batches += 1;
            debug!(batch = result.batches, size = chunk.len(), "running batch");
            let outcomes = join_all(chunk.into_iter().map(|(i, item)| {
                let fut = f(item);
                async move { (i, fut.await) }
            }))
            .await;
            for (i, outcome) in outcomes {
                match outcome {
                    Ok(r) => result.add_success(i, r),
                    Err(e) => result.add_failure(i, e),
                }
            }
            if pending.peek().is_some() && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        result.execution_time = start.elapsed();
        result.total_processed = total;
        result
    }

    /// Send every request through `client` with the same options.
    pub async fn run_through<Req, Resp>(
        &self,
        client: &ResilientClient<Req, Resp>,
        requests: Vec<Req>,
        options: CallOptions,
    ) -> BatchResult<Resp, Error>
    where
        Req: CacheableRequest + Clone + Send + Sync + 'static,
        Resp: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.run(requests, |req| client.call(req, options.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorClass;

    #[tokio::test(start_paused = true)]
    async fn test_partitions_and_keeps_failures_per_index() {
        let runner = BatchRunner::new(
            BatchConfig::new()
                .with_batch_size(4)
                .with_inter_batch_delay(Duration::from_millis(100)),
        );
        let started = tokio::time::Instant::now();
        let result = runner
            .run((0..10u32).collect(), |n| async move {
                if n % 3 == 0 {
                    Err(Error::upstream("p", ErrorClass::ServerError, Some(500), "odd luck"))
                } else {
                    Ok(n * 10)
                }
            })
            .await;

        assert_eq!(result.batches, 3);
        assert_eq!(result.total_processed, 10);
        assert_eq!(
            result.failures.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 3, 6, 9]
        );
        assert_eq!(result.successes[0], (1, 10));
        assert_eq!(result.success_count(), 6);
        // Two gaps between three batches, none after the last.
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let result = BatchRunner::default()
            .run(Vec::<u32>::new(), |n| async move { Ok(n) })
            .await;
        assert_eq!(result.batches, 0);
        assert_eq!(result.success_rate(), 0.0);
    }
}
