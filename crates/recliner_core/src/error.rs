//! Error types for Recliner core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Recliner core operations.
///
/// Each variant maps to an HTTP-shaped status through
/// [`CoreError::status_code`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] recliner_storage::StorageError),

    /// JSON or CBOR conversion error.
    #[error("codec error: {0}")]
    Codec(#[from] recliner_codec::CodecError),

    /// Unknown database, document, design or attachment.
    #[error("not found: {what}")]
    NotFound {
        /// What was missing.
        what: String,
    },

    /// Stale or mismatched revision on write.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
        /// The document's current revision.
        current_rev: Option<String>,
    },

    /// Malformed selector, document, index or request body.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
        /// The document's current revision, when the request named one.
        current_rev: Option<String>,
    },

    /// An installed validation rule rejected the write.
    #[error("validation failed: {reason}")]
    ValidationFailed {
        /// Why the rule rejected the write.
        reason: String,
    },

    /// The database already exists.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a conflict error carrying the current revision.
    pub fn conflict(message: impl Into<String>, current_rev: Option<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            current_rev,
        }
    }

    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            current_rev: None,
        }
    }

    /// Creates a bad-request error that reports the current revision.
    pub fn bad_request_with_rev(message: impl Into<String>, current_rev: Option<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            current_rev,
        }
    }

    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the HTTP-shaped status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::BadRequest { .. } | Self::ValidationFailed { .. } => 400,
            Self::PreconditionFailed { .. } => 412,
            Self::Storage(_) | Self::Codec(_) | Self::Internal { .. } => 500,
        }
    }

    /// Returns the short error name used in response bodies.
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::BadRequest { .. } => "bad_request",
            Self::ValidationFailed { .. } => "forbidden",
            Self::PreconditionFailed { .. } => "file_exists",
            Self::Storage(_) | Self::Codec(_) | Self::Internal { .. } => "internal_server_error",
        }
    }

    /// Returns the current revision carried by conflict-style errors.
    pub fn current_rev(&self) -> Option<&str> {
        match self {
            Self::Conflict { current_rev, .. } | Self::BadRequest { current_rev, .. } => {
                current_rev.as_deref()
            }
            _ => None,
        }
    }
}
