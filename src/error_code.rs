//! 上游错误分类：决定一次失败是否可重试、是否应计入熔断器。
//!
//! Upstream error classes.
//!
//! Every failure coming back from a provider or backend is mapped onto one of
//! these classes. The class alone decides retryability, so the retry executor,
//! the circuit breaker and the provider chain all agree on what "transient"
//! means.
//!
//! | Code  | Class               | Retryable | Caller fault |
//! |-------|---------------------|-----------|--------------|
//! | E1001 | invalid_request     | no        | yes          |
//! | E1002 | authentication      | no        | no           |
//! | E1003 | permission_denied   | no        | no           |
//! | E1004 | not_found           | no        | yes          |
//! | E1005 | request_too_large   | no        | yes          |
//! | E2001 | rate_limited        | yes       | no           |
//! | E2002 | quota_exhausted     | no        | no           |
//! | E3001 | server_error        | yes       | no           |
//! | E3002 | overloaded          | yes       | no           |
//! | E3003 | timeout             | yes       | no           |
//! | E3004 | network             | yes       | no           |
//! | E9999 | unknown             | no        | no           |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_guard::error_code::ErrorClass;
//!
//! let class = ErrorClass::from_http_status(429);
//! assert_eq!(class.code(), "E2001");
//! assert!(class.retryable());
//! assert!(!ErrorClass::from_http_status(401).retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// E1001: Malformed request, invalid parameters, or missing required fields
    InvalidRequest,
    /// E1002: Invalid, expired, or missing API key
    Authentication,
    /// E1003: Valid credentials but insufficient permissions
    PermissionDenied,
    /// E1004: Requested model, collection, or endpoint does not exist
    NotFound,
    /// E1005: Input exceeds context window or payload size limit
    RequestTooLarge,
    /// E2001: Request rate limit exceeded
    RateLimited,
    /// E2002: Account usage quota or billing limit reached
    QuotaExhausted,
    /// E3001: Internal server error on provider side (any 5xx without a better match)
    ServerError,
    /// E3002: Provider temporarily overloaded
    Overloaded,
    /// E3003: Request timed out before a response was received
    Timeout,
    /// E3004: Connection refused, reset, or DNS failure
    Network,
    /// E9999: Error could not be classified
    Unknown,
}

impl ErrorClass {
    /// Canonical code string (e.g. `"E1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::Authentication => "E1002",
            Self::PermissionDenied => "E1003",
            Self::NotFound => "E1004",
            Self::RequestTooLarge => "E1005",
            Self::RateLimited => "E2001",
            Self::QuotaExhausted => "E2002",
            Self::ServerError => "E3001",
            Self::Overloaded => "E3002",
            Self::Timeout => "E3003",
            Self::Network => "E3004",
            Self::Unknown => "E9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Timeouts, 5xx-class and rate-limit failures are worth another attempt.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout | Self::Network
        )
    }

    /// The request itself is wrong; the dependency is healthy.
    ///
    /// Such failures never count against a circuit breaker.
    #[inline]
    pub fn caller_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest | Self::NotFound | Self::RequestTooLarge
        )
    }

    /// Maps a provider error code/type string (OpenAI, Anthropic, Gemini, Qdrant).
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let class = match provider_code {
            "invalid_request" | "invalid_request_error" | "INVALID_ARGUMENT" => {
                Self::InvalidRequest
            }
            "invalid_api_key" | "authentication_error" | "UNAUTHENTICATED" => Self::Authentication,
            "permission_error" | "PERMISSION_DENIED" => Self::PermissionDenied,
            "not_found_error" | "model_not_found" | "NOT_FOUND" => Self::NotFound,
            "request_too_large" | "context_length_exceeded" => Self::RequestTooLarge,
            "rate_limit_exceeded" | "rate_limit_error" => Self::RateLimited,
            "insufficient_quota" | "RESOURCE_EXHAUSTED" => Self::QuotaExhausted,
            "server_error" | "api_error" | "INTERNAL" => Self::ServerError,
            "overloaded_error" | "UNAVAILABLE" => Self::Overloaded,
            "DEADLINE_EXCEEDED" => Self::Timeout,
            _ => return None,
        };
        Some(class)
    }

    /// Maps an HTTP status to its most likely class. Any unmatched 5xx is a
    /// server error.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            502 | 503 | 529 => Self::Overloaded,
            504 => Self::Timeout,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_5xx_is_retryable() {
        for status in [500u16, 501, 502, 503, 504, 507, 529, 599] {
            assert!(
                ErrorClass::from_http_status(status).retryable(),
                "status {} should be retryable",
                status
            );
        }
    }

    #[test]
    fn test_auth_and_validation_are_not_retryable() {
        for status in [400u16, 401, 403, 404, 413, 422] {
            assert!(!ErrorClass::from_http_status(status).retryable());
        }
    }

    #[test]
    fn test_provider_code_overrides() {
        assert_eq!(
            ErrorClass::from_provider_code("insufficient_quota"),
            Some(ErrorClass::QuotaExhausted)
        );
        assert_eq!(
            ErrorClass::from_provider_code("overloaded_error"),
            Some(ErrorClass::Overloaded)
        );
        assert_eq!(ErrorClass::from_provider_code("something_else"), None);
    }

    #[test]
    fn test_caller_fault_classes() {
        assert!(ErrorClass::InvalidRequest.caller_fault());
        assert!(!ErrorClass::ServerError.caller_fault());
        assert!(!ErrorClass::Authentication.caller_fault());
    }
}
