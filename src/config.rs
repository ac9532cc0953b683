//! 配置模块：从 YAML 文件或 `AI_GUARD_*` 环境变量加载各依赖的弹性参数。
//!
//! # Configuration
//!
//! [`GuardConfig`] describes every guarded dependency (timeouts, retries,
//! breaker thresholds, cache sizing), the LLM providers and the vector
//! backend. It is loaded from YAML and then adjusted by environment knobs:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `AI_GUARD_LLM_TIMEOUT_MS` / `AI_GUARD_VECTOR_TIMEOUT_MS` | Overall call timeout |
//! | `AI_GUARD_LLM_MAX_RETRIES` / `AI_GUARD_VECTOR_MAX_RETRIES` | Retries after the first attempt |
//! | `AI_GUARD_LLM_CACHE_TTL_MS` / `AI_GUARD_VECTOR_CACHE_TTL_MS` | Cache TTL |
//! | `AI_GUARD_CACHE_MAX_SIZE` | L1 size for both dependencies |
//! | `AI_GUARD_BREAKER_FAILURE_THRESHOLD` / `AI_GUARD_BREAKER_RESET_TIMEOUT_MS` | Breaker tuning for both dependencies |
//! | `AI_GUARD_QDRANT_URL` / `AI_GUARD_QDRANT_COLLECTION` | Vector backend |
//! | `AI_GUARD_REDIS_URL` | Shared L2 cache (feature `redis-cache`) |
//! | `AI_GUARD_BATCH_SIZE` / `AI_GUARD_BATCH_DELAY_MS` | Batch runner |
//!
//! Provider credentials are read from the variable named by `api_key_env`
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY` by default). A
//! provider without a credential stays registered but disabled.

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::llm::{ProviderKind, ProviderSettings};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const LLM_CACHE_TTL_MS: u64 = 60 * 60 * 1000;
pub const VECTOR_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Resilience parameters for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub timeout_ms: u64,
    /// Retries after the first attempt; `0` disables retry.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
    pub cache_enabled: bool,
    /// `None` uses the dependency's default (1 h for LLM, 5 min for vector).
    pub cache_ttl_ms: Option<u64>,
    pub cache_max_size: usize,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_ratio: 0.2,
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
            cache_enabled: true,
            cache_ttl_ms: None,
            cache_max_size: 1_000,
        }
    }
}

impl DependencyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_retries.saturating_add(1))
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter_ratio(self.jitter_ratio)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_reset_timeout(Duration::from_millis(self.reset_timeout_ms))
    }

    pub fn cache_config(&self, default_ttl_ms: u64) -> CacheConfig {
        CacheConfig::new()
            .with_enabled(self.cache_enabled)
            .with_max_size(self.cache_max_size)
            .with_ttl(Duration::from_millis(self.cache_ttl_ms.unwrap_or(default_ttl_ms)))
    }

    fn validate(&self, path: &str) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::validation_with_context(
                msg.to_string(),
                ErrorContext::new()
                    .with_field_path(format!("{}.{}", path, field))
                    .with_source("config"),
            ))
        };
        if self.timeout_ms == 0 {
            return invalid("timeout_ms", "must be greater than zero");
        }
        if self.failure_threshold == 0 {
            return invalid("failure_threshold", "must be at least 1");
        }
        if self.success_threshold == 0 {
            return invalid("success_threshold", "must be at least 1");
        }
        if !(self.jitter_ratio > 0.0 && self.jitter_ratio <= 1.0) {
            return invalid("jitter_ratio", "must be greater than 0 and at most 1");
        }
        if self.base_delay_ms > self.max_delay_ms {
            return invalid("base_delay_ms", "must not exceed max_delay_ms");
        }
        if self.cache_max_size == 0 {
            return invalid("cache_max_size", "must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    /// Environment variable holding the credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_priority() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        model: impl Into<String>,
        priority: u32,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: None,
            model: model.into(),
            api_key_env: None,
            priority,
            enabled: true,
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    /// Resolve the credential through `lookup` and produce runtime settings.
    pub fn resolve<F>(&self, timeout: Duration, lookup: F) -> ProviderSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        ProviderSettings {
            name: self.name.clone(),
            kind: self.kind,
            base_url: self.base_url().to_string(),
            model: self.model.clone(),
            api_key: lookup(self.api_key_env()).filter(|k| !k.trim().is_empty()),
            priority: self.priority,
            enabled: self.enabled,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorBackendConfig {
    #[serde(default = "default_vector_name")]
    pub name: String,
    pub url: String,
    pub collection: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_base_url")]
    pub embedding_base_url: String,
    #[serde(default = "default_embedding_key_env")]
    pub embedding_api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_vector_name() -> String {
    "qdrant".to_string()
}

fn default_embedding_base_url() -> String {
    ProviderKind::OpenAi.default_base_url().to_string()
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    crate::vector::DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimensions() -> usize {
    crate::vector::DEFAULT_EMBEDDING_DIMENSIONS
}

impl VectorBackendConfig {
    pub fn new(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: default_vector_name(),
            url: url.into(),
            collection: collection.into(),
            api_key_env: None,
            embedding_base_url: default_embedding_base_url(),
            embedding_api_key_env: default_embedding_key_env(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedCacheBackend {
    #[default]
    None,
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedCacheConfig {
    pub backend: SharedCacheBackend,
    pub redis_url: Option<String>,
    pub namespace: String,
    /// Entry bound for the in-process shared store.
    pub max_entries: usize,
    /// Per-operation bound on the shared store; a slower read is a miss.
    pub op_timeout_ms: u64,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            backend: SharedCacheBackend::None,
            redis_url: None,
            namespace: "ai-guard".to_string(),
            max_entries: 10_000,
            op_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            inter_batch_delay_ms: 100,
        }
    }
}

impl BatchSettings {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::new()
            .with_batch_size(self.batch_size)
            .with_inter_batch_delay(Duration::from_millis(self.inter_batch_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub llm: DependencyConfig,
    pub vector: DependencyConfig,
    pub providers: Vec<ProviderConfig>,
    pub vector_backend: Option<VectorBackendConfig>,
    pub shared_cache: SharedCacheConfig,
    pub batch: BatchSettings,
    /// Mixed into every cache key; bump to invalidate everything at once.
    pub cache_key_salt: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            llm: DependencyConfig::default(),
            vector: DependencyConfig::default(),
            providers: default_providers(),
            vector_backend: None,
            shared_cache: SharedCacheConfig::default(),
            batch: BatchSettings::default(),
            cache_key_salt: None,
        }
    }
}

/// OpenAI, then Anthropic, then Gemini. Each is only usable once its key is set.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("openai", ProviderKind::OpenAi, "gpt-4o-mini", 1),
        ProviderConfig::new("anthropic", ProviderKind::Anthropic, "claude-3-5-haiku-latest", 2),
        ProviderConfig::new("gemini", ProviderKind::Gemini, "gemini-1.5-flash", 3),
    ]
}

impl GuardConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let cfg: GuardConfig = serde_yaml::from_str(content).map_err(|e| {
            let msg = e.to_string();
            let looks_structural = msg.contains("missing field")
                || msg.contains("unknown field")
                || msg.contains("invalid type")
                || msg.contains("unknown variant");
            let ctx = ErrorContext::new().with_source("config_loader");
            if looks_structural {
                Error::validation_with_context(format!("invalid config structure: {}", msg), ctx)
            } else {
                Error::configuration_with_context(format!("unreadable YAML: {}", msg), ctx)
            }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new()
                    .with_source("config_loader")
                    .with_details(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults adjusted by the process environment.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `AI_GUARD_*` knobs found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
            match raw {
                None => Ok(None),
                Some(v) => v.trim().parse::<T>().map(Some).map_err(|_| {
                    Error::configuration_with_context(
                        format!("invalid value '{}'", v),
                        ErrorContext::new().with_field_path(key).with_source("env"),
                    )
                }),
            }
        }
        let get = |key: &str| parse::<u64>(key, lookup(key));

        if let Some(v) = get("AI_GUARD_LLM_TIMEOUT_MS")? {
            self.llm.timeout_ms = v;
        }
        if let Some(v) = get("AI_GUARD_VECTOR_TIMEOUT_MS")? {
            self.vector.timeout_ms = v;
        }
        if let Some(v) = parse::<u32>("AI_GUARD_LLM_MAX_RETRIES", lookup("AI_GUARD_LLM_MAX_RETRIES"))? {
            self.llm.max_retries = v;
        }
        if let Some(v) =
            parse::<u32>("AI_GUARD_VECTOR_MAX_RETRIES", lookup("AI_GUARD_VECTOR_MAX_RETRIES"))?
        {
            self.vector.max_retries = v;
        }
        if let Some(v) = get("AI_GUARD_LLM_CACHE_TTL_MS")? {
            self.llm.cache_ttl_ms = Some(v);
        }
        if let Some(v) = get("AI_GUARD_VECTOR_CACHE_TTL_MS")? {
            self.vector.cache_ttl_ms = Some(v);
        }
        if let Some(v) = parse::<usize>("AI_GUARD_CACHE_MAX_SIZE", lookup("AI_GUARD_CACHE_MAX_SIZE"))? {
            self.llm.cache_max_size = v;
            self.vector.cache_max_size = v;
        }
        if let Some(v) = parse::<u32>(
            "AI_GUARD_BREAKER_FAILURE_THRESHOLD",
            lookup("AI_GUARD_BREAKER_FAILURE_THRESHOLD"),
        )? {
            self.llm.failure_threshold = v;
            self.vector.failure_threshold = v;
        }
        if let Some(v) = get("AI_GUARD_BREAKER_RESET_TIMEOUT_MS")? {
            self.llm.reset_timeout_ms = v;
            self.vector.reset_timeout_ms = v;
        }
        if let Some(url) = lookup("AI_GUARD_QDRANT_URL") {
            let collection = lookup("AI_GUARD_QDRANT_COLLECTION")
                .or_else(|| self.vector_backend.as_ref().map(|v| v.collection.clone()))
                .unwrap_or_else(|| "documents".to_string());
            if let Some(vb) = self.vector_backend.as_mut() {
                vb.url = url;
                vb.collection = collection;
            } else {
                self.vector_backend = Some(VectorBackendConfig::new(url, collection));
            }
        }
        if let Some(url) = lookup("AI_GUARD_REDIS_URL") {
            self.shared_cache.backend = SharedCacheBackend::Redis;
            self.shared_cache.redis_url = Some(url);
        }
        if let Some(v) = parse::<usize>("AI_GUARD_BATCH_SIZE", lookup("AI_GUARD_BATCH_SIZE"))? {
            self.batch.batch_size = v;
        }
        if let Some(v) = get("AI_GUARD_BATCH_DELAY_MS")? {
            self.batch.inter_batch_delay_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.validate("llm")?;
        self.vector.validate("vector")?;

        let mut seen = HashSet::new();
        for (i, p) in self.providers.iter().enumerate() {
            let path = format!("providers[{}]", i);
            if !seen.insert(p.name.as_str()) {
                return Err(Error::validation_with_context(
                    format!("duplicate provider name '{}'", p.name),
                    ErrorContext::new().with_field_path(format!("{}.name", path)).with_source("config"),
                ));
            }
            validate_url(p.base_url(), &format!("{}.base_url", path))?;
        }
        if let Some(ref vb) = self.vector_backend {
            validate_url(&vb.url, "vector_backend.url")?;
            validate_url(&vb.embedding_base_url, "vector_backend.embedding_base_url")?;
            if vb.collection.trim().is_empty() {
                return Err(Error::validation_with_context(
                    "collection must not be empty",
                    ErrorContext::new()
                        .with_field_path("vector_backend.collection")
                        .with_source("config"),
                ));
            }
        }
        if self.shared_cache.backend == SharedCacheBackend::Redis {
            match self.shared_cache.redis_url {
                Some(ref u) => validate_url(u, "shared_cache.redis_url")?,
                None => {
                    return Err(Error::validation_with_context(
                        "redis backend selected without redis_url",
                        ErrorContext::new()
                            .with_field_path("shared_cache.redis_url")
                            .with_source("config"),
                    ))
                }
            }
        }
        if self.shared_cache.op_timeout_ms == 0 {
            return Err(Error::validation_with_context(
                "must be greater than zero",
                ErrorContext::new()
                    .with_field_path("shared_cache.op_timeout_ms")
                    .with_source("config"),
            ));
        }
        if self.batch.batch_size == 0 {
            return Err(Error::validation_with_context(
                "must be at least 1",
                ErrorContext::new().with_field_path("batch.batch_size").with_source("config"),
            ));
        }
        Ok(())
    }
}

fn validate_url(raw: &str, field_path: &str) -> Result<()> {
    url::Url::parse(raw).map(|_| ()).map_err(|e| {
        Error::validation_with_context(
            format!("invalid URL '{}': {}", raw, e),
            ErrorContext::new().with_field_path(field_path).with_source("config"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_yaml_round_trip_with_defaults() {
        let yaml = r#"
llm:
  timeout_ms: 20000
  max_retries: 1
vector:
  cache_ttl_ms: 60000
providers:
  - name: local
    kind: openai
    base_url: http://localhost:8080/v1
    model: llama3
    api_key_env: LOCAL_KEY
    priority: 1
vector_backend:
  url: http://localhost:6333
  collection: threat-intel
"#;
        let cfg = GuardConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.llm.timeout_ms, 20_000);
        assert_eq!(cfg.llm.retry_policy().max_attempts, 2);
        assert_eq!(cfg.llm.failure_threshold, 5);
        assert_eq!(cfg.providers.len(), 1);
        assert!(cfg.providers[0].enabled);
        assert_eq!(
            cfg.vector.cache_config(VECTOR_CACHE_TTL_MS).default_ttl,
            Duration::from_secs(60)
        );
        assert_eq!(
            cfg.llm.cache_config(LLM_CACHE_TTL_MS).default_ttl,
            Duration::from_secs(3600)
        );
        let vb = cfg.vector_backend.unwrap();
        assert_eq!(vb.embedding_model, "text-embedding-3-small");
        assert_eq!(vb.embedding_dimensions, 1536);
    }

    #[test]
    fn test_bad_url_is_rejected_with_path() {
        let yaml = r#"
providers:
  - name: broken
    kind: anthropic
    base_url: "not a url"
    model: claude
"#;
        let err = GuardConfig::from_yaml_str(yaml).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("providers[0].base_url"));
    }

    #[test]
    fn test_zero_jitter_is_rejected() {
        let err = GuardConfig::from_yaml_str("llm:\n  jitter_ratio: 0.0\n").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("llm.jitter_ratio"));

        assert!(GuardConfig::from_yaml_str("vector:\n  jitter_ratio: 1.5\n").is_err());
        assert!(GuardConfig::from_yaml_str("llm:\n  jitter_ratio: 0.05\n").is_ok());
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let yaml = "providers:\n  - name: x\n    kind: cohere\n    model: m\n";
        assert!(matches!(
            GuardConfig::from_yaml_str(yaml),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AI_GUARD_LLM_TIMEOUT_MS", "1500"),
            ("AI_GUARD_BREAKER_FAILURE_THRESHOLD", "3"),
            ("AI_GUARD_QDRANT_URL", "http://qdrant:6333"),
            ("AI_GUARD_BATCH_SIZE", "25"),
        ]
        .into_iter()
        .collect();
        let mut cfg = GuardConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.llm.timeout_ms, 1_500);
        assert_eq!(cfg.vector.failure_threshold, 3);
        assert_eq!(cfg.vector_backend.as_ref().unwrap().collection, "documents");
        assert_eq!(cfg.batch.batch_config().batch_size, 25);
        cfg.validate().unwrap();

        let bad: HashMap<&str, &str> = [("AI_GUARD_LLM_TIMEOUT_MS", "soon")].into_iter().collect();
        assert!(GuardConfig::default()
            .apply_overrides(|k| bad.get(k).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_provider_needs_credential() {
        let p = ProviderConfig::new("openai", ProviderKind::OpenAi, "gpt-4o-mini", 1);
        let without = p.resolve(Duration::from_secs(5), |_| None);
        assert!(!without.is_usable());
        let with = p.resolve(Duration::from_secs(5), |k| {
            (k == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        });
        assert!(with.is_usable());
        assert_eq!(with.base_url, "https://api.openai.com/v1");
    }
}
