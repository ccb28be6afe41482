//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding of a persisted frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] recliner_codec::CodecError),

    /// The journal or another persisted file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The named record store does not exist.
    #[error("unknown store: {name}")]
    UnknownStore {
        /// Store name.
        name: String,
    },

    /// The named index does not exist on the store.
    #[error("unknown index {index} on store {store}")]
    UnknownIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },

    /// A record has no usable primary key, or a range bound is not a key.
    #[error("invalid key in store {store}: {detail}")]
    InvalidKey {
        /// Store name.
        store: String,
        /// What was wrong with the key.
        detail: String,
    },

    /// Another process holds the data directory lock.
    #[error("data directory locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    pub(crate) fn unknown_store(name: &str) -> Self {
        Self::UnknownStore {
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid_key(store: &str, detail: impl Into<String>) -> Self {
        Self::InvalidKey {
            store: store.to_string(),
            detail: detail.into(),
        }
    }
}
