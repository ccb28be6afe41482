//! In-memory storage backend.

use crate::backend::{ScanControl, ScanEntry, ScanRequest, StorageBackend};
use crate::batch::WriteBatch;
use crate::error::StorageResult;
use crate::range::KeyRange;
use crate::schema::{SchemaChange, StoreSpec};
use crate::tables::Tables;
use parking_lot::RwLock;
use recliner_codec::Value;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Ephemeral databases that don't need persistence
///
/// # Example
///
/// ```rust
/// use recliner_codec::value;
/// use recliner_storage::{KeyRange, MemoryBackend, SchemaChange, StorageBackend, StoreSpec};
///
/// let backend = MemoryBackend::new("people");
/// backend
///     .upgrade(&[SchemaChange::CreateStore(StoreSpec::new("docs", "_id"))])
///     .unwrap();
/// backend.put("docs", value!({"_id": "a", "n": 1})).unwrap();
/// assert_eq!(backend.count("docs", None, &KeyRange::all()).unwrap(), 1);
/// ```
pub struct MemoryBackend {
    name: String,
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Creates an empty backend at schema version 0.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.tables.read().version()
    }

    fn stores(&self) -> Vec<StoreSpec> {
        self.tables.read().specs()
    }

    fn upgrade(&self, changes: &[SchemaChange]) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        tables.validate_schema(changes)?;
        tables.apply_schema(changes);
        let version = tables.version() + 1;
        tables.set_version(version);
        Ok(version)
    }

    fn get(&self, store: &str, key: &Value) -> StorageResult<Option<Value>> {
        self.tables.read().get(store, key)
    }

    fn count(&self, store: &str, index: Option<&str>, range: &KeyRange) -> StorageResult<usize> {
        self.tables.read().count(store, index, range)
    }

    fn scan(
        &self,
        request: &ScanRequest,
        visitor: &mut dyn FnMut(ScanEntry<'_>) -> ScanControl,
    ) -> StorageResult<()> {
        self.tables.read().scan(request, visitor)
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut tables = self.tables.write();
        tables.validate(&batch)?;
        tables.apply(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use recliner_codec::value;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new("test");
        backend
            .upgrade(&[
                SchemaChange::CreateStore(StoreSpec::new("docs", "_id")),
                SchemaChange::CreateStore(StoreSpec::new("log", "seq")),
            ])
            .unwrap();
        backend
    }

    #[test]
    fn upgrade_bumps_version() {
        let b = backend();
        assert_eq!(b.version(), 1);
        assert_eq!(b.stores().len(), 2);
        assert_eq!(b.upgrade(&[]).unwrap(), 2);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let b = backend();
        let mut batch = WriteBatch::new();
        batch
            .put("docs", value!({"_id": "a"}))
            .put("log", value!({"no_seq": true}));
        assert!(matches!(b.commit(batch), Err(StorageError::InvalidKey { .. })));
        assert_eq!(b.get("docs", &value!("a")).unwrap(), None);
    }

    #[test]
    fn last_returns_greatest_key() {
        let b = backend();
        for seq in [3, 1, 2] {
            b.put("log", value!({"seq": seq})).unwrap();
        }
        assert_eq!(b.last("log").unwrap(), Some(value!({"seq": 3})));
        b.delete("log", value!(3)).unwrap();
        assert_eq!(b.last("log").unwrap(), Some(value!({"seq": 2})));
    }

    #[test]
    fn collect_with_limit() {
        let b = backend();
        for seq in 1..=10 {
            b.put("log", value!({"seq": seq})).unwrap();
        }
        let request = ScanRequest::new("log").range(KeyRange::lower_bound(5, true));
        let rows = b.collect(&request, Some(3)).unwrap();
        assert_eq!(rows, vec![value!({"seq": 6}), value!({"seq": 7}), value!({"seq": 8})]);
    }

    #[test]
    fn unknown_store_errors() {
        let b = backend();
        assert!(matches!(
            b.get("nope", &value!("a")),
            Err(StorageError::UnknownStore { .. })
        ));
    }
}
