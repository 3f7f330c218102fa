//! Error kinds surfaced by the API client
//!
//! Every failed call ends in exactly one of these. Screens render the
//! non-terminal kinds themselves; `SessionExpired` has already cleared the
//! session and fired the redirect by the time a caller sees it.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No response: DNS, connect, timeout, or the body stream broke.
    #[error("transport failure: {message}")]
    Transport { message: String, timeout: bool },

    /// Non-success with a JSON error body, or a `status: false` envelope.
    #[error("API error ({status}): {message}")]
    Structured {
        status: u16,
        code: Option<String>,
        message: String,
        body: Value,
    },

    /// Non-success with a body that is not a JSON object (proxy error pages).
    #[error("HTTP {status} {status_text}")]
    UnstructuredHttp {
        status: u16,
        status_text: String,
        body: String,
    },

    /// Refresh failed; the session has been cleared.
    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Only transport failures are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    /// HTTP status carried by the error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Structured { status, .. } | ApiError::UnstructuredHttp { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
