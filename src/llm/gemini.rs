//! Gemini generateContent adapter.
//!
//! - `contents[].parts[]` instead of `messages`; the system prompt goes to
//!   `system_instruction`.
//! - `generationConfig` carries `maxOutputTokens` and `temperature`.
//! - The API key is a `?key=` query parameter.

use super::{Completion, CompletionRequest, ProviderSettings, RawCompletion};
use crate::chain::Provider;
use crate::transport::{Auth, HttpTransport};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
}

#[derive(Debug)]
pub struct GeminiProvider {
    settings: ProviderSettings,
    transport: HttpTransport,
    path: String,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let mut transport = HttpTransport::new(&settings.name, &settings.base_url, settings.timeout)?;
        if let Some(ref key) = settings.api_key {
            transport = transport.with_auth(Auth::Query {
                name: "key".into(),
                value: key.clone(),
            });
        }
        let path = format!("/v1beta/models/{}:generateContent", settings.model);
        Ok(Self {
            settings,
            transport,
            path,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut generation = json!({"maxOutputTokens": request.max_tokens});
        if let Some(t) = request.temperature {
            generation["temperature"] = json!(t);
        }
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": generation,
        });
        if let Some(ref system) = request.system {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }
}

#[async_trait]
impl Provider<CompletionRequest, Completion> for GeminiProvider {
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
        let raw: GenerateResponse = self.transport.post_json(&self.path, &self.body(request)).await?;
        RawCompletion::Gemini(raw).normalize(&self.settings.name, &self.settings.model)
    }
}
