//! HTTP plumbing shared by the provider adapters.

pub mod http;

pub use http::{classify_failure, retry_after_ms, Auth, HttpTransport};
