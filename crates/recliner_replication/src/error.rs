//! Error types for replication.

use recliner_core::CoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A remote endpoint answered with an error status.
    #[error("remote error {status}: {message}")]
    Remote {
        /// HTTP-shaped status code.
        status: u16,
        /// Error reason returned by the remote.
        message: String,
    },

    /// A response body could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The replication request is malformed.
    #[error("invalid replication request: {0}")]
    InvalidRequest(String),

    /// Neither endpoint belongs to this instance.
    #[error("unsupported replication from {source_url} to {target_url}")]
    UnsupportedTopology {
        /// Source URL.
        source_url: String,
        /// Target URL.
        target_url: String,
    },

    /// A checkpoint document could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Database error on a local endpoint.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] recliner_codec::CodecError),
}

impl ReplicationError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later invocation may succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Transport { retryable, .. } => *retryable,
            ReplicationError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Maps the error to an HTTP-shaped status.
    pub fn status_code(&self) -> u16 {
        match self {
            ReplicationError::InvalidRequest(_) | ReplicationError::UnsupportedTopology { .. } => {
                400
            }
            ReplicationError::Database(e) => e.status_code(),
            ReplicationError::Remote { status, .. } => *status,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ReplicationError::transport_retryable("connection reset").is_retryable());
        assert!(!ReplicationError::transport_fatal("no client").is_retryable());
        assert!(ReplicationError::Remote {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!ReplicationError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn status_codes() {
        let err = ReplicationError::UnsupportedTopology {
            source_url: "http://a/x".into(),
            target_url: "http://b/y".into(),
        };
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("http://a/x"));

        let err = ReplicationError::from(CoreError::not_found("database nope"));
        assert_eq!(err.status_code(), 404);
        assert_eq!(ReplicationError::Checkpoint("x".into()).status_code(), 500);
    }
}
