//! OpenAI-compatible chat completions adapter.

use super::{Completion, CompletionRequest, ProviderSettings, RawCompletion};
use crate::chain::Provider;
use crate::transport::{Auth, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    settings: ProviderSettings,
    transport: HttpTransport,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let mut transport = HttpTransport::new(&settings.name, &settings.base_url, settings.timeout)?;
        if let Some(ref key) = settings.api_key {
            transport = transport.with_auth(Auth::Bearer(key.clone()));
        }
        Ok(Self {
            settings,
            transport,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        let mut body = json!({
            "model": self.settings.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl Provider<CompletionRequest, Completion> for OpenAiProvider {
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
        let raw: ChatResponse = self
            .transport
            .post_json("/chat/completions", &self.body(request))
            .await?;
        RawCompletion::OpenAi(raw).normalize(&self.settings.name, &self.settings.model)
    }
}
