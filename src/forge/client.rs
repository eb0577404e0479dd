use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::safety::Params;

/// Errors that can occur while talking to the forge
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Forge API returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, retry after {0}s")]
    RateLimitExceeded(u64),

    #[error("Operation not supported by the forge client: {0}")]
    UnsupportedOperation(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{0}': {1}")]
    InvalidParameter(String, String),

    #[error("Invalid forge URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ForgeError {
    /// Whether repeating the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ApiError { status, .. } => *status >= 500,
            Self::RateLimitExceeded(_) => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Executes administrative operations against a forge
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Run `operation` and return the forge's response body
    async fn call(&self, operation: &str, params: &Params) -> Result<Value, ForgeError>;

    /// Current remote state that `operation` would change
    ///
    /// `Ok(None)` when the operation has nothing worth backing up.
    async fn snapshot(&self, operation: &str, params: &Params) -> Result<Option<Value>, ForgeError>;
}
