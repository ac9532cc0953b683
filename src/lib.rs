//! # ai-lib-guard
//!
//! 面向外部 AI 依赖（LLM 提供商、向量检索）的弹性访问层：熔断、重试、分层缓存、请求合并与提供商回退。
//!
//! A resilience layer for code that calls external AI dependencies such as
//! LLM completion APIs and vector search backends.
//!
//! ## Overview
//!
//! Every guarded dependency is reached through a [`ResilientClient`], which
//! composes the primitives below in a fixed order:
//!
//! 1. tiered cache lookup (L1 in-process LRU, optional shared L2)
//! 2. coalescing of identical in-flight requests
//! 3. the dependency-level circuit breaker
//! 4. a prioritized provider chain, each provider with its own breaker and retries
//! 5. an overall deadline
//!
//! Successful responses are written back to the cache; failures are never cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_guard::bootstrap::bootstrap;
//! use ai_lib_guard::client::CallOptions;
//! use ai_lib_guard::config::GuardConfig;
//! use ai_lib_guard::llm::CompletionRequest;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_guard::Result<()> {
//!     let config = GuardConfig::load(None)?;
//!     let deps = bootstrap(&config).await?;
//!
//!     let request = CompletionRequest::new("Summarize the release notes").with_max_tokens(256);
//!     let completion = deps.llm.call(request, CallOptions::new()).await?;
//!     println!("{} via {}", completion.text, completion.provider);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Circuit breaker and retry executor |
//! | [`cache`] | Cache keys, L1 LRU, shared L2 backends, tiered manager |
//! | [`coalesce`] | Single-flight request coalescing |
//! | [`chain`] | Prioritized provider fallback chain |
//! | [`client`] | The resilient client and its builder |
//! | [`batch`] | Batched bulk execution |
//! | [`transport`] | Shared HTTP transport and failure classification |
//! | [`llm`] | OpenAI, Anthropic and Gemini completion providers |
//! | [`vector`] | Embeddings plus Qdrant similarity search |
//! | [`config`] | YAML / environment configuration |
//! | [`bootstrap`] | Builds all clients from a configuration |

pub mod batch;
pub mod bootstrap;
pub mod cache;
pub mod chain;
pub mod client;
pub mod coalesce;
pub mod config;
pub mod error_code;
pub mod llm;
pub mod resilience;
pub mod transport;
pub mod vector;

pub use cache::{CacheKey, CacheableRequest, KeyPattern};
pub use chain::{ChainResponse, Provider, ProviderChain};
pub use client::{CallOptions, ResilientClient, ResilientClientBuilder};
pub use error_code::ErrorClass;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, UpstreamFailure};
