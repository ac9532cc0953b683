//! Cache key generation.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Namespaced, hashed cache key. Renders as `namespace:hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub hash: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hash: hash.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.hash)
    }
}

/// A request that knows how to describe itself for caching and coalescing.
pub trait CacheableRequest {
    fn cache_key(&self, generator: &CacheKeyGenerator) -> CacheKey;
}

/// Matcher for bulk invalidation.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Keys starting with the given string (e.g. `"vector:"` for a whole namespace).
    Prefix(String),
    Regex(regex::Regex),
}

impl KeyPattern {
    pub fn prefix(p: impl Into<String>) -> Self {
        KeyPattern::Prefix(p.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        regex::Regex::new(pattern).map(KeyPattern::Regex).map_err(|e| {
            Error::validation_with_context(
                format!("invalid cache key pattern: {}", e),
                ErrorContext::new().with_source("cache_key_pattern"),
            )
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
            KeyPattern::Regex(r) => r.is_match(key),
        }
    }
}

/// Trim, lower-case and collapse internal whitespace so that trivially
/// different phrasings of the same query share a key.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives stable keys from normalized request content.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a deployment-specific salt into every key (e.g. a model version).
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Hash `text` (normalized) together with `fields` (sorted by name, values trimmed).
    pub fn generate(
        &self,
        namespace: &str,
        text: &str,
        fields: &BTreeMap<String, String>,
    ) -> CacheKey {
        let mut parts: BTreeMap<String, String> = BTreeMap::new();
        parts.insert("text".into(), normalize_text(text));
        for (k, v) in fields {
            parts.insert(format!("field.{}", k.trim()), v.trim().to_string());
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt".into(), s.clone());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(namespace, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equivalent_requests_collide() {
        let gen = CacheKeyGenerator::new();
        let a = gen.generate(
            "vector",
            "  Ransomware   attack on Hospital ",
            &fields(&[("category", "incidents"), ("severity", "high")]),
        );
        let b = gen.generate(
            "vector",
            "ransomware attack on hospital",
            &fields(&[("severity", " high"), ("category", "incidents")]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_filters_and_namespace_discriminate() {
        let gen = CacheKeyGenerator::new();
        let base = gen.generate("vector", "q", &fields(&[("category", "news")]));
        assert_ne!(base, gen.generate("vector", "q", &fields(&[("category", "research")])));
        assert_ne!(base, gen.generate("llm", "q", &fields(&[("category", "news")])));
        assert_ne!(
            base,
            CacheKeyGenerator::new()
                .with_salt("v2")
                .generate("vector", "q", &fields(&[("category", "news")]))
        );
    }

    #[test]
    fn test_display_and_patterns() {
        let key = CacheKey::new("llm", "abc123");
        assert_eq!(key.to_string(), "llm:abc123");
        assert!(KeyPattern::prefix("llm:").matches(&key.to_string()));
        assert!(!KeyPattern::prefix("vector:").matches(&key.to_string()));
        assert!(KeyPattern::regex("^llm:abc").unwrap().matches("llm:abc123"));
        assert!(KeyPattern::regex("(").is_err());
    }
}
