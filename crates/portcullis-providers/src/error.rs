//! Provider error types

use thiserror::Error;

/// Errors from external collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The remote service answered with an error status.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the service.
        message: String,
    },

    /// The remote service answered with something we could not use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The identity provider refused the authorization code.
    #[error("Authorization code rejected: {0}")]
    CodeRejected(String),

    /// Local configuration is unusable (bad URL, missing credential).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An email could not be handed to the mail transport.
    #[error("Email delivery failed: {0}")]
    EmailDelivery(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestFailed(e) if e.is_timeout())
    }
}
