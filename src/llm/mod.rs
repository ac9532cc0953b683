//! 大模型提供商模块：OpenAI 兼容、Anthropic 与 Gemini 的统一补全接口。
//!
//! # LLM providers
//!
//! Each adapter turns a [`CompletionRequest`] into its provider's wire format,
//! parses the provider-specific response into a [`RawCompletion`] variant and
//! normalizes it to one canonical [`Completion`] before returning. Nothing
//! provider-shaped leaves this module.
//!
//! | Kind | Endpoint | Auth |
//! |------|----------|------|
//! | [`ProviderKind::OpenAi`] | `POST /chat/completions` | bearer token |
//! | [`ProviderKind::Anthropic`] | `POST /v1/messages` | `x-api-key` + `anthropic-version` |
//! | [`ProviderKind::Gemini`] | `POST /v1beta/models/{model}:generateContent` | `key` query param |

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::cache::{CacheKey, CacheKeyGenerator, CacheableRequest};
use crate::chain::Provider;
use crate::error_code::ErrorClass;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl CacheableRequest for CompletionRequest {
    fn cache_key(&self, generator: &CacheKeyGenerator) -> CacheKey {
        let mut fields = BTreeMap::new();
        fields.insert("max_tokens".to_string(), self.max_tokens.to_string());
        if let Some(ref s) = self.system {
            fields.insert("system".to_string(), s.clone());
        }
        if let Some(t) = self.temperature {
            fields.insert("temperature".to_string(), format!("{:.3}", t));
        }
        generator.generate("llm", &self.prompt, &fields)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Canonical completion, identical in shape whichever provider produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Provider-specific response bodies.
#[derive(Debug, Clone)]
pub enum RawCompletion {
    OpenAi(openai::ChatResponse),
    Anthropic(anthropic::MessagesResponse),
    Gemini(gemini::GenerateResponse),
}

impl RawCompletion {
    /// Collapse to a [`Completion`]. A response without any text is an
    /// upstream fault.
    pub fn normalize(self, provider: &str, requested_model: &str) -> Result<Completion> {
        let (text, model, finish_reason, usage) = match self {
            RawCompletion::OpenAi(r) => {
                let choice = r.choices.into_iter().next();
                let finish = choice.as_ref().and_then(|c| c.finish_reason.clone());
                let text = choice.and_then(|c| c.message.content);
                let usage = r.usage.map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                });
                (text, r.model, finish, usage)
            }
            RawCompletion::Anthropic(r) => {
                let text: String = r
                    .content
                    .into_iter()
                    .filter(|b| b.kind == "text")
                    .filter_map(|b| b.text)
                    .collect();
                let usage = r.usage.map(|u| Usage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                });
                ((!text.is_empty()).then_some(text), r.model, r.stop_reason, usage)
            }
            RawCompletion::Gemini(r) => {
                let candidate = r.candidates.into_iter().next();
                let finish = candidate.as_ref().and_then(|c| c.finish_reason.clone());
                let text: String = candidate
                    .and_then(|c| c.content)
                    .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                    .unwrap_or_default();
                let usage = r.usage_metadata.map(|u| Usage {
                    input_tokens: u.prompt_token_count,
                    output_tokens: u.candidates_token_count,
                });
                ((!text.is_empty()).then_some(text), r.model_version, finish, usage)
            }
        };
        let text = text.ok_or_else(|| {
            Error::upstream(provider, ErrorClass::Unknown, None, "response contained no text")
        })?;
        Ok(Completion {
            text,
            provider: provider.to_string(),
            model: model.unwrap_or_else(|| requested_model.to_string()),
            finish_reason,
            usage,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat completions API.
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Resolved settings for one LLM provider.
#[derive(Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub priority: u32,
    pub enabled: bool,
    pub timeout: Duration,
}

impl ProviderSettings {
    /// Configured on *and* holding a credential.
    pub fn is_usable(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

pub fn build_provider(
    settings: ProviderSettings,
) -> Result<Arc<dyn Provider<CompletionRequest, Completion>>> {
    Ok(match settings.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(settings)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_prompts_share_key() {
        let gen = CacheKeyGenerator::new();
        let a = CompletionRequest::new("Summarize  THIS").with_temperature(0.2);
        let b = CompletionRequest::new(" summarize this ").with_temperature(0.2);
        assert_eq!(a.cache_key(&gen), b.cache_key(&gen));
        let c = CompletionRequest::new("summarize this").with_temperature(0.7);
        assert_ne!(a.cache_key(&gen), c.cache_key(&gen));
        assert_eq!(a.cache_key(&gen).namespace, "llm");
    }

    #[test]
    fn test_normalize_rejects_empty_response() {
        let raw = RawCompletion::Anthropic(anthropic::MessagesResponse {
            model: None,
            content: vec![],
            stop_reason: None,
            usage: None,
        });
        let err = raw.normalize("anthropic", "claude").unwrap_err();
        assert!(matches!(err, Error::NonRetryableUpstream(_)));
    }

    #[test]
    fn test_usable_requires_key() {
        let mut s = ProviderSettings {
            name: "openai".into(),
            kind: ProviderKind::OpenAi,
            base_url: ProviderKind::OpenAi.default_base_url().into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            priority: 1,
            enabled: true,
            timeout: Duration::from_secs(30),
        };
        assert!(!s.is_usable());
        s.api_key = Some("sk-test".into());
        assert!(s.is_usable());
        s.enabled = false;
        assert!(!s.is_usable());
        assert!(!format!("{:?}", s).contains("sk-test"));
    }
}
