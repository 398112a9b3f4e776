//! Backend error types.

use thiserror::Error;

/// Errors raised while talking to a generative backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Any other non-success status, or an unreadable body.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response carried no completion text.
    #[error("empty completion from {0}")]
    EmptyCompletion(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    NetworkError(String),
}
