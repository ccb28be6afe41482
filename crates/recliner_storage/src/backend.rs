//! Storage backend trait definition.

use crate::batch::WriteBatch;
use crate::error::StorageResult;
use crate::range::{Direction, KeyRange};
use crate::schema::{SchemaChange, StoreSpec};
use recliner_codec::Value;

/// Whether a scan should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    /// Visit the next record.
    Continue,
    /// Stop the scan.
    Stop,
}

/// One record visited by a scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanEntry<'a> {
    /// The key the scan is ordered by (index key, or the primary key).
    pub key: &'a Value,
    /// The record's primary key.
    pub primary_key: &'a Value,
    /// The record.
    pub value: &'a Value,
}

/// Parameters of a directional scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Store to scan.
    pub store: String,
    /// Secondary index to scan, or `None` for primary key order.
    pub index: Option<String>,
    /// Keys to visit.
    pub range: KeyRange,
    /// Iteration order.
    pub direction: Direction,
    /// Resume strictly after this `(key, primary_key)` position.
    pub after: Option<(Value, Value)>,
}

impl ScanRequest {
    /// Scans a whole store in primary key order.
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            ..Self::default()
        }
    }

    /// Scans through a secondary index.
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Restricts the scan to a key range.
    #[must_use]
    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    /// Sets the iteration order.
    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Resumes after a previously visited position.
    #[must_use]
    pub fn after(mut self, key: Value, primary_key: Value) -> Self {
        self.after = Some((key, primary_key));
        self
    }
}

/// An ordered record database with named stores and secondary indexes.
///
/// Records are JSON values keyed by a field of the record. Indexes map a
/// field of each record to its primary key and support counting and
/// directional iteration over key ranges.
///
/// # Invariants
///
/// - `commit` applies every op of a batch or none of them
/// - a scan visits records in `(key, primary_key)` order for its direction
/// - `upgrade` increments `version` exactly once per call
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - For tests and ephemeral databases
/// - [`super::FileBackend`] - Journaled persistent storage
pub trait StorageBackend: Send + Sync {
    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns the schema version.
    fn version(&self) -> u64;

    /// Returns the definitions of all stores.
    fn stores(&self) -> Vec<StoreSpec>;

    /// Applies schema changes and bumps the version.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if a change references an unknown store or the
    /// change cannot be persisted.
    fn upgrade(&self, changes: &[SchemaChange]) -> StorageResult<u64>;

    /// Reads one record by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store does not exist.
    fn get(&self, store: &str, key: &Value) -> StorageResult<Option<Value>>;

    /// Counts records whose key lies in `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or index does not exist, or a bound is
    /// not a valid key.
    fn count(&self, store: &str, index: Option<&str>, range: &KeyRange) -> StorageResult<usize>;

    /// Visits records in order until the visitor stops or the range ends.
    ///
    /// The visitor runs under the backend's read lock and must not call
    /// back into the same backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or index does not exist, or a bound is
    /// not a valid key.
    fn scan(
        &self,
        request: &ScanRequest,
        visitor: &mut dyn FnMut(ScanEntry<'_>) -> ScanControl,
    ) -> StorageResult<()>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing applied, if any op targets an unknown
    /// store, a put lacks a valid primary key, or persisting fails.
    fn commit(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Inserts or replaces one record.
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::commit`].
    fn put(&self, store: &str, value: Value) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(store, value);
        self.commit(batch)
    }

    /// Deletes one record.
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::commit`].
    fn delete(&self, store: &str, key: Value) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(store, key);
        self.commit(batch)
    }

    /// Returns the record with the greatest primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store does not exist.
    fn last(&self, store: &str) -> StorageResult<Option<Value>> {
        let mut found = None;
        let request = ScanRequest::new(store).direction(Direction::Prev);
        self.scan(&request, &mut |entry| {
            found = Some(entry.value.clone());
            ScanControl::Stop
        })?;
        Ok(found)
    }

    /// Collects up to `limit` records of a scan.
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::scan`].
    fn collect(&self, request: &ScanRequest, limit: Option<usize>) -> StorageResult<Vec<Value>> {
        let mut out = Vec::new();
        if limit == Some(0) {
            return Ok(out);
        }
        self.scan(request, &mut |entry| {
            out.push(entry.value.clone());
            if limit.is_some_and(|l| out.len() >= l) {
                ScanControl::Stop
            } else {
                ScanControl::Continue
            }
        })?;
        Ok(out)
    }
}
