//! Error categories returned by a [`crate::Provider`] stream.

use thiserror::Error;

/// Categorised provider failure. The agent loop maps each variant to a turn
/// outcome: retry with backoff, fail the turn, or treat as cooperative
/// cancellation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 400-class request rejected by the provider (malformed request,
    /// unsupported parameter). Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 401/403 — invalid credentials or insufficient scope. Never retried.
    #[error("auth or forbidden: {0}")]
    AuthOrForbidden(String),

    /// 429 — rate limited. Retried with backoff per the retry policy.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 5xx — provider-side failure. Retried with backoff per the retry policy.
    #[error("server error: {0}")]
    ServerError(String),

    /// The stream was cancelled cooperatively; never logged as an error.
    #[error("cancelled")]
    Cancelled,

    /// Transport-level failure (DNS, TCP reset, TLS). Retried with backoff.
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the caller's retry-with-backoff policy applies to this error,
    /// as opposed to failing the turn immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::ServerError(_) | ProviderError::Network(_)
        )
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::BadRequest(format!("json error: {err}"))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
