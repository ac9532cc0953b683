use crate::error_code::ErrorClass;
use crate::{Error, ErrorContext, Result};
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::time::{Duration, Instant};
use tracing::debug;

/// How a provider expects its credential.
#[derive(Clone)]
pub enum Auth {
    None,
    Bearer(String),
    Header { name: String, value: String },
    Query { name: String, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials.
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
            Auth::Header { name, .. } => write!(f, "Header({}: ***)", name),
            Auth::Query { name, .. } => write!(f, "Query({}=***)", name),
        }
    }
}

/// JSON-over-HTTP transport for one provider. Every failure leaves this type
/// already classified as an upstream error.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    auth: Auth,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(provider: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let provider = provider.into();
        // Production-friendly defaults (env-overridable).
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(
                env::var("AI_GUARD_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("AI_GUARD_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                format!("cannot build HTTP client: {}", e),
                ErrorContext::new().with_source("http_transport").with_details(provider.clone()),
            )
        })?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Auth::None,
            headers: Vec::new(),
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `path` and decode a JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body);
        match &self.auth {
            Auth::None => {}
            Auth::Bearer(key) => req = req.bearer_auth(key),
            Auth::Header { name, value } => req = req.header(name.as_str(), value.as_str()),
            Auth::Query { name, value } => req = req.query(&[(name.as_str(), value.as_str())]),
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let start = Instant::now();
        let resp = req.send().await.map_err(|e| self.send_error(e))?;
        let status = resp.status().as_u16();
        debug!(
            provider = %self.provider,
            http_status = status,
            duration_ms = start.elapsed().as_millis() as u64,
            path,
            "upstream responded"
        );

        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(&self.provider, status, &body).with_retry_after(retry_after));
        }

        let bytes = resp.bytes().await.map_err(|e| self.send_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::upstream(
                &self.provider,
                ErrorClass::Unknown,
                Some(status),
                format!("undecodable response body: {}", e),
            )
        })
    }

    fn send_error(&self, e: reqwest::Error) -> Error {
        let class = if e.is_timeout() {
            ErrorClass::Timeout
        } else {
            ErrorClass::Network
        };
        Error::upstream(&self.provider, class, None, e.to_string())
    }
}

/// Parse `retry-after-ms`, then `retry-after` (seconds, fractional allowed).
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
    {
        return Some(ms.max(0.0) as u64);
    }
    let secs = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())?;
    Some((secs.max(0.0) * 1000.0) as u64)
}

/// Build the classified error for a non-2xx response.
///
/// A recognised provider error code wins over the HTTP status.
pub fn classify_failure(provider: &str, status: u16, body: &str) -> Error {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let err_obj = json.as_ref().and_then(|j| j.get("error"));
    let provider_code = err_obj.and_then(|e| {
        ["code", "type", "status"]
            .iter()
            .filter_map(|k| e.get(*k).and_then(|v| v.as_str()))
            .find(|code| ErrorClass::from_provider_code(code).is_some())
    });
    let class = provider_code
        .and_then(ErrorClass::from_provider_code)
        .unwrap_or_else(|| ErrorClass::from_http_status(status));
    let message = err_obj
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());
    Error::upstream(provider, class, Some(status), message)
}
