use crate::chain::AttemptRecord;
use crate::error_code::ErrorClass;
use std::fmt;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers[0].base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "coalescer")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One failed call to one upstream, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub provider: String,
    pub class: ErrorClass,
    pub status: Option<u16>,
    pub message: String,
    /// Provider-supplied `Retry-After` hint.
    pub retry_after_ms: Option<u64>,
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned {}", self.provider, self.class)?;
        if let Some(status) = self.status {
            write!(f, " [HTTP {}]", status)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Unified error type for guarded upstream calls.
///
/// `Clone` is required: every waiter coalesced under one key receives the
/// identical error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Circuit open for '{dependency}'{}", format_retry_after(.retry_after_ms))]
    CircuitOpen {
        dependency: String,
        /// Remaining open time; `None` while a half-open probe is in flight.
        retry_after_ms: Option<u64>,
    },

    #[error("Retryable upstream error: {0}")]
    RetryableUpstream(UpstreamFailure),

    #[error("Non-retryable upstream error: {0}")]
    NonRetryableUpstream(UpstreamFailure),

    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("All {} provider(s) failed: {}", .attempts.len(), summarize_attempts(.attempts))]
    AllProvidersFailed { attempts: Vec<AttemptRecord> },

    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_retry_after(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry in {}ms)", ms),
        None => " (probe in flight)".to_string(),
    }
}

fn summarize_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| match &a.error {
            Some(e) => format!("{}: {}", a.provider, e),
            None => format!("{}: ok", a.provider),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Build an upstream error, choosing the retryable or non-retryable variant
    /// from the class.
    pub fn upstream(
        provider: impl Into<String>,
        class: ErrorClass,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        let failure = UpstreamFailure {
            provider: provider.into(),
            class,
            status,
            message: message.into(),
            retry_after_ms: None,
        };
        if class.retryable() {
            Error::RetryableUpstream(failure)
        } else {
            Error::NonRetryableUpstream(failure)
        }
    }

    /// Attach a `Retry-After` hint to an upstream error. Other variants pass through.
    pub fn with_retry_after(mut self, ms: Option<u64>) -> Self {
        if let Error::RetryableUpstream(ref mut f) | Error::NonRetryableUpstream(ref mut f) = self
        {
            f.retry_after_ms = ms;
        }
        self
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Default retry classification: only transient upstream failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RetryableUpstream(_))
    }

    /// Whether this failure says something about the dependency's health.
    ///
    /// Rejections by the breaker itself, caller mistakes and local
    /// configuration problems are not dependency failures.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            Error::CircuitOpen { .. }
            | Error::Configuration { .. }
            | Error::Validation { .. }
            | Error::Serialization(_) => false,
            Error::RetryableUpstream(f) | Error::NonRetryableUpstream(f) => {
                !f.class.caller_fault()
            }
            Error::RetriesExhausted { last, .. } => last.counts_as_failure(),
            Error::AllProvidersFailed { attempts } => attempts
                .iter()
                .filter_map(|a| a.error.as_ref())
                .any(Error::counts_as_failure),
            Error::Timeout { .. } | Error::Runtime { .. } => true,
        }
    }

    /// Upstream class of the failure, looking through retry wrappers.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Error::RetryableUpstream(f) | Error::NonRetryableUpstream(f) => Some(f.class),
            Error::RetriesExhausted { last, .. } => last.class(),
            Error::Timeout { .. } => Some(ErrorClass::Timeout),
            _ => None,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RetryableUpstream(f) | Error::NonRetryableUpstream(f) => f.retry_after_ms,
            _ => None,
        }
    }

    /// Attempt records of an aggregate failure, if this is one.
    pub fn attempts(&self) -> Option<&[AttemptRecord]> {
        match self {
            Error::AllProvidersFailed { attempts } => Some(attempts),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
