//! Error types for authentication operations
//!
//! Every operation of the core fails with an [`ApiError`]. Its [`kind`]
//! is the code surfaced to callers; the detailed password variants travel
//! as failed preconditions so clients can render specific messages without
//! the project-wide login path revealing whether an email exists.
//!
//! [`kind`]: ApiError::kind

use portcullis_providers::ProviderError;
use portcullis_store::StoreError;
use thiserror::Error;

/// Boxed underlying cause of an internal error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    FailedPrecondition,
    PermissionDenied,
    NotFound,
    Unauthenticated,
    DeadlineExceeded,
    Internal,
}

/// Authentication error types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, mismatched OAuth state or mismatched email
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A policy gate is not satisfied
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The caller may not perform this operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// No valid caller identity
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// External I/O outlived the request deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Infrastructure failure; the cause is kept for diagnostics only
    #[error("internal error: {context}")]
    Internal {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The supplied password does not match
    #[error("incorrect password")]
    IncorrectPassword,

    /// The supplied password appears in a known breach
    #[error("password is compromised")]
    PasswordCompromised,

    /// No unique user can log in with a password for this email
    #[error("passwords are unavailable for this email")]
    PasswordsUnavailableForEmail,
}

/// Result type for authentication operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    /// Internal error wrapping `source`.
    pub fn internal(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Internal error without an underlying cause.
    pub fn internal_message(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            source: None,
        }
    }

    /// Map a provider failure, keeping timeouts distinguishable.
    pub fn from_provider(context: &str, err: ProviderError) -> Self {
        if err.is_timeout() {
            Self::DeadlineExceeded
        } else {
            Self::internal(context, err)
        }
    }

    /// Code surfaced to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::FailedPrecondition(_)
            | Self::IncorrectPassword
            | Self::PasswordCompromised
            | Self::PasswordsUnavailableForEmail => ErrorKind::FailedPrecondition,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Whether retrying the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgument | ErrorKind::FailedPrecondition => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::DeadlineExceeded => 504,
            ErrorKind::Internal => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::FailedPrecondition(_) => "FAILED_PRECONDITION",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Internal { .. } => "INTERNAL",
            Self::IncorrectPassword => "INCORRECT_PASSWORD",
            Self::PasswordCompromised => "PASSWORD_COMPROMISED",
            Self::PasswordsUnavailableForEmail => "PASSWORDS_UNAVAILABLE_FOR_EMAIL",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { entity } => {
                Self::FailedPrecondition(format!("{} already exists", entity))
            }
            StoreError::NotFound { entity } => Self::NotFound(entity.to_string()),
            other => Self::internal("store operation failed", other),
        }
    }
}
