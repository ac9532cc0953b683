//! Anthropic Messages API adapter.
//!
//! - System prompt is a top-level `system` field, not a message.
//! - `max_tokens` is mandatory.
//! - Response text lives in `content[]` blocks of type `text`.

use super::{Completion, CompletionRequest, ProviderSettings, RawCompletion};
use crate::chain::Provider;
use crate::transport::{Auth, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<MessagesUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    settings: ProviderSettings,
    transport: HttpTransport,
}

impl AnthropicProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let mut transport = HttpTransport::new(&settings.name, &settings.base_url, settings.timeout)?
            .with_header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(ref key) = settings.api_key {
            transport = transport.with_auth(Auth::Header {
                name: "x-api-key".into(),
                value: key.clone(),
            });
        }
        Ok(Self {
            settings,
            transport,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.settings.model,
            "max_tokens": request.max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl Provider<CompletionRequest, Completion> for AnthropicProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn priority(&self) -> u32 {
        self.settings.priority
    }

    fn is_enabled(&self) -> bool {
        self.settings.is_usable()
    }

    async fn invoke(&self, request: &CompletionRequest) -> Result<Completion> {
        let raw: MessagesResponse = self
            .transport
            .post_json("/v1/messages", &self.body(request))
            .await?;
        RawCompletion::Anthropic(raw).normalize(&self.settings.name, &self.settings.model)
    }
}
