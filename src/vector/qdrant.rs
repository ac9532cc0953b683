//! OpenAI embeddings + Qdrant similarity search.

use super::{Embedder, SearchMatch, SearchRequest, SearchResponse};
use crate::chain::Provider;
use crate::error_code::ErrorClass;
use crate::transport::{Auth, HttpTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug)]
pub struct OpenAiEmbedder {
    transport: HttpTransport,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let mut transport = HttpTransport::new("openai-embeddings", base_url, timeout)?;
        if let Some(key) = api_key {
            transport = transport.with_auth(Auth::Bearer(key));
        }
        Ok(Self {
            transport,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp: EmbeddingResponse = self
            .transport
            .post_json(
                "/embeddings",
                &json!({"model": self.model, "input": text, "dimensions": self.dimensions}),
            )
            .await?;
        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                Error::upstream(
                    self.transport.provider(),
                    ErrorClass::Unknown,
                    None,
                    "embedding response had no data",
                )
            })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    #[serde(default)]
    result: Vec<QdrantPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Qdrant `points/search` as a chain provider.
pub struct QdrantSearch {
    name: String,
    priority: u32,
    enabled: bool,
    collection: String,
    transport: HttpTransport,
    embedder: Arc<dyn Embedder>,
}

impl QdrantSearch {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        collection: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let name = name.into();
        let mut transport = HttpTransport::new(&name, base_url, timeout)?;
        if let Some(key) = api_key {
            transport = transport.with_auth(Auth::Header {
                name: "api-key".into(),
                value: key,
            });
        }
        Ok(Self {
            name,
            priority: 1,
            enabled: true,
            collection: collection.into(),
            transport,
            embedder,
        })
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn filter(request: &SearchRequest) -> Option<serde_json::Value> {
        if request.filter.is_empty() {
            return None;
        }
        let must: Vec<_> = request
            .filter
            .iter()
            .map(|(k, v)| json!({"key": k, "match": {"value": v}}))
            .collect();
        Some(json!({ "must": must }))
    }
}

#[async_trait]
impl Provider<SearchRequest, SearchResponse> for QdrantSearch {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn invoke(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let vector = self.embedder.embed(&request.query).await?;
        let mut body = json!({
            "vector": vector,
            "limit": request.top_k,
            "with_payload": true,
        });
        if let Some(filter) = Self::filter(request) {
            body["filter"] = filter;
        }
        let collection = request.collection.as_deref().unwrap_or(&self.collection);
        let path = format!("/collections/{}/points/search", collection);
        let resp: QdrantSearchResponse = self.transport.post_json(&path, &body).await?;

        let mut matches: Vec<SearchMatch> = resp
            .result
            .into_iter()
            .map(|p| SearchMatch {
                id: match p.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(SearchResponse {
            matches,
            backend: self.name.clone(),
        })
    }
}

impl std::fmt::Debug for QdrantSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantSearch")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("base_url", &self.transport.base_url())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_is_must_clause() {
        let req = SearchRequest::new("q")
            .with_filter("category", "news")
            .with_filter("lang", "en");
        let f = QdrantSearch::filter(&req).unwrap();
        assert_eq!(
            f,
            json!({"must": [
                {"key": "category", "match": {"value": "news"}},
                {"key": "lang", "match": {"value": "en"}},
            ]})
        );
        assert!(QdrantSearch::filter(&SearchRequest::new("q")).is_none());
    }
}
