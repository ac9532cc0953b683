//! 向量检索模块：查询文本先嵌入，再在向量库中按元数据过滤检索相似结果。
//!
//! # Vector search
//!
//! A [`SearchRequest`] (query text plus metadata filter) is embedded with an
//! [`Embedder`] and sent to a vector store. [`QdrantSearch`] is the bundled
//! store adapter; it implements [`Provider`] so it plugs into a
//! [`ProviderChain`](crate::chain::ProviderChain) like any LLM.

mod qdrant;

pub use qdrant::{OpenAiEmbedder, QdrantSearch, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL};

use crate::cache::{CacheKey, CacheKeyGenerator, CacheableRequest};
use crate::chain::Provider;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Exact-match metadata filter; every pair must match.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Overrides the backend's default collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: BTreeMap::new(),
            top_k: DEFAULT_TOP_K,
            collection: None,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

impl CacheableRequest for SearchRequest {
    fn cache_key(&self, generator: &CacheKeyGenerator) -> CacheKey {
        let mut fields: BTreeMap<String, String> = self
            .filter
            .iter()
            .map(|(k, v)| (format!("filter.{}", k), v.clone()))
            .collect();
        fields.insert("top_k".to_string(), self.top_k.to_string());
        if let Some(ref c) = self.collection {
            fields.insert("collection".to_string(), c.clone());
        }
        generator.generate("vector", &self.query, &fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ranked by descending score.
    pub matches: Vec<SearchMatch>,
    pub backend: String,
}

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// Any provider able to answer similarity queries.
pub type SearchProvider = dyn Provider<SearchRequest, SearchResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_order_does_not_change_key() {
        let gen = CacheKeyGenerator::new();
        let a = SearchRequest::new("Ransomware Trends")
            .with_filter("category", "incidents")
            .with_filter("region", "eu");
        let b = SearchRequest::new("ransomware   trends")
            .with_filter("region", "eu")
            .with_filter("category", "incidents");
        assert_eq!(a.cache_key(&gen), b.cache_key(&gen));
        assert_ne!(
            a.cache_key(&gen),
            a.clone().with_top_k(3).cache_key(&gen)
        );
        assert_eq!(a.cache_key(&gen).namespace, "vector");
    }
}
