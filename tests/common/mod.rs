//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use ai_lib_guard::cache::{KeyPattern, SharedCache};
use ai_lib_guard::chain::Provider;
use ai_lib_guard::llm::{Completion, CompletionRequest};
use ai_lib_guard::{Error, ErrorClass, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A provider that replays a script of outcomes, then answers successfully.
pub struct ScriptedProvider {
    name: &'static str,
    priority: u32,
    delay: Duration,
    script: Mutex<VecDeque<Result<String>>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, priority: u32, script: Vec<Result<String>>) -> Arc<Self> {
        Self::with_delay(name, priority, Duration::ZERO, script)
    }

    pub fn with_delay(
        name: &'static str,
        priority: u32,
        delay: Duration,
        script: Vec<Result<String>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            delay,
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    /// Fails every call with the given error.
    pub fn always_failing(name: &'static str, priority: u32, err: Error) -> Arc<Self> {
        Self::new(name, priority, vec![Err(err); 64])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider<CompletionRequest, Completion> for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn invoke(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(outcome) => outcome?,
            None => format!("{}: {}", self.name, request.prompt),
        };
        Ok(Completion {
            text,
            provider: self.name.to_string(),
            model: "scripted".to_string(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        })
    }
}

pub fn server_error(provider: &str) -> Error {
    Error::upstream(provider, ErrorClass::ServerError, Some(500), "internal error")
}

pub fn auth_error(provider: &str) -> Error {
    Error::upstream(provider, ErrorClass::Authentication, Some(401), "bad key")
}

/// A shared cache whose every operation hangs forever.
pub struct StalledSharedCache;

#[async_trait]
impl SharedCache for StalledSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        std::future::pending().await
    }

    async fn delete_matching(&self, _pattern: &KeyPattern) -> Result<usize> {
        std::future::pending().await
    }

    async fn clear(&self) -> Result<()> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}
