//! Atomic multi-store write batches.

use recliner_codec::Value;
use serde::{Deserialize, Serialize};

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or replace a record; the key is read from the store's key path.
    Put {
        /// Target store.
        store: String,
        /// The full record.
        value: Value,
    },
    /// Remove the record with the given primary key, if present.
    Delete {
        /// Target store.
        store: String,
        /// Primary key.
        key: Value,
    },
    /// Remove every record of a store.
    Clear {
        /// Target store.
        store: String,
    },
}

/// An ordered list of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, store: impl Into<String>, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Put {
            store: store.into(),
            value,
        });
        self
    }

    /// Queues a delete.
    pub fn delete(&mut self, store: impl Into<String>, key: impl Into<Value>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            store: store.into(),
            key: key.into(),
        });
        self
    }

    /// Queues a clear.
    pub fn clear(&mut self, store: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Clear {
            store: store.into(),
        });
        self
    }

    /// Appends every op of `other`.
    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    /// Returns the number of queued ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the queued ops.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch, returning its ops.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
