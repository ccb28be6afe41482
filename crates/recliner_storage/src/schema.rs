//! Store and index definitions.

use serde::{Deserialize, Serialize};

/// A secondary index over one key path of a record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within its store.
    pub name: String,
    /// Dotted path of the indexed field.
    pub key_path: String,
    /// Index each element of an array value separately.
    pub multi_entry: bool,
}

impl IndexSpec {
    /// Creates a single-entry index whose name equals its key path.
    pub fn new(key_path: impl Into<String>) -> Self {
        let key_path = key_path.into();
        Self {
            name: key_path.clone(),
            key_path,
            multi_entry: false,
        }
    }

    /// Sets the multi-entry flag.
    #[must_use]
    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}

/// A named record store keyed by one field of its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSpec {
    /// Store name, unique within a database.
    pub name: String,
    /// Dotted path of the primary key field.
    pub key_path: String,
    /// Secondary indexes.
    pub indexes: Vec<IndexSpec>,
}

impl StoreSpec {
    /// Creates a store with no secondary indexes.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// One step of a schema upgrade.
///
/// Creating something that already exists with the same definition is a
/// no-op, so upgrades can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaChange {
    /// Create a record store (and its indexes).
    CreateStore(StoreSpec),
    /// Drop a record store with all its rows.
    DeleteStore(String),
    /// Add an index to an existing store, building it from current rows.
    CreateIndex {
        /// Target store.
        store: String,
        /// Index definition.
        index: IndexSpec,
    },
    /// Drop an index.
    DeleteIndex {
        /// Target store.
        store: String,
        /// Index name.
        index: String,
    },
}
