//! 请求批处理模块：将大量独立请求分批并发执行，批次之间保持最小间隔。
//!
//! # Request Batching Module
//!
//! Bulk operations (embedding thousands of documents, classifying a backlog)
//! should not hit a provider all at once. [`BatchRunner`] partitions the work
//! into fixed-size batches, runs each batch concurrently and waits at least
//! [`BatchConfig::inter_batch_delay`] before starting the next.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchRunner`] | Runs items in batches, through any async fn or a [`ResilientClient`](crate::client::ResilientClient) |
//! | [`BatchConfig`] | Batch size (default 100) and inter-batch delay (default 100 ms) |
//! | [`BatchResult`] | Per-index successes and failures plus timing |
//!
//! One failed item never aborts its batch or the run.

mod executor;

pub use executor::{BatchConfig, BatchResult, BatchRunner};
