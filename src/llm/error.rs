//! LLM error types

use thiserror::Error;

/// LLM error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Status, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::MalformedResponse, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::EmptyCompletion, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Blocked, message)
    }

    /// Map a transport failure from reqwest onto the taxonomy
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else {
            Self::network(format!("Request failed: {err}"))
        }
    }

    /// Classify a non-success HTTP status. `detail` is whatever the provider
    /// put in its error body (already extracted when the shape is known).
    pub fn from_status(status: reqwest::StatusCode, detail: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::auth(format!("Authentication failed: {detail}")),
            429 => Self::rate_limit(format!("Rate limited: {detail}")),
            400 | 404 | 422 => Self::invalid_request(format!("Invalid request ({status}): {detail}")),
            500..=599 => Self::server_error(format!("Server error ({status}): {detail}")),
            _ => Self::status(format!("HTTP {status}: {detail}")),
        }
    }
}

/// Error classification, used for logging and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection failure or broken transfer
    Network,
    /// Transport-level timeout
    Timeout,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Rejected request (400, 404, 422)
    InvalidRequest,
    /// Any other non-success status
    Status,
    /// Body could not be decoded
    MalformedResponse,
    /// Decoded fine but carried no text
    EmptyCompletion,
    /// Provider refused to answer (safety filter, refusal stop reason)
    Blocked,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimit | Self::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::Status => "status",
            Self::MalformedResponse => "malformed_response",
            Self::EmptyCompletion => "empty_completion",
            Self::Blocked => "blocked",
        }
    }
}
