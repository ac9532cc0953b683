//! Resilient client: the one entry point callers use for a guarded dependency.
//!
//! Keep the public surface small: build with [`ResilientClientBuilder`], call
//! with [`CallOptions`], observe with [`DependencyHealth`].
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
pub mod types;

pub use builder::ResilientClientBuilder;
pub use core::ResilientClient;
pub use types::{CallOptions, DependencyHealth};
