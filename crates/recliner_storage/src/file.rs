//! Journaled file storage backend.

use crate::backend::{ScanControl, ScanEntry, ScanRequest, StorageBackend};
use crate::batch::WriteBatch;
use crate::error::StorageResult;
use crate::journal::{Journal, JournalEntry};
use crate::range::KeyRange;
use crate::schema::{SchemaChange, StoreSpec};
use crate::tables::Tables;
use parking_lot::{Mutex, RwLock};
use recliner_codec::Value;
use std::path::{Path, PathBuf};

/// A persistent backend: the full state lives in memory and every schema
/// change and committed batch is appended to a journal file first.
///
/// Opening replays the journal. [`FileBackend::compact`] rewrites the
/// journal as a snapshot of the current state.
///
/// # Example
///
/// ```no_run
/// use recliner_codec::value;
/// use recliner_storage::{FileBackend, SchemaChange, StorageBackend, StoreSpec};
/// use std::path::Path;
///
/// let backend = FileBackend::open("people", Path::new("people.journal"), true).unwrap();
/// backend
///     .upgrade(&[SchemaChange::CreateStore(StoreSpec::new("docs", "_id"))])
///     .unwrap();
/// backend.put("docs", value!({"_id": "a"})).unwrap();
/// ```
pub struct FileBackend {
    name: String,
    path: PathBuf,
    tables: RwLock<Tables>,
    journal: Mutex<Journal>,
}

impl FileBackend {
    /// Opens or creates the journal at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a replayed entry no
    /// longer applies.
    pub fn open(name: impl Into<String>, path: &Path, sync_on_commit: bool) -> StorageResult<Self> {
        let (journal, entries) = Journal::open(path, sync_on_commit)?;
        let mut tables = Tables::default();
        let replayed = entries.len();
        for entry in entries {
            match entry {
                JournalEntry::Schema { version, changes } => {
                    tables.validate_schema(&changes)?;
                    tables.apply_schema(&changes);
                    tables.set_version(version);
                }
                JournalEntry::Batch(batch) => {
                    tables.validate(&batch)?;
                    tables.apply(batch)?;
                }
            }
        }
        let name = name.into();
        tracing::debug!(db = %name, replayed, version = tables.version(), "opened journal");
        Ok(Self {
            name,
            path: path.to_path_buf(),
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn journal_size(&self) -> StorageResult<u64> {
        self.journal.lock().size()
    }

    /// Rewrites the journal as one schema entry plus one batch of live rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        let tables = self.tables.read();
        let (changes, batch) = tables.snapshot();
        let entries = [
            JournalEntry::Schema {
                version: tables.version(),
                changes,
            },
            JournalEntry::Batch(batch),
        ];
        self.journal.lock().rewrite(&entries)?;
        tracing::info!(db = %self.name, "compacted journal");
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for FileBackend {
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
        let version = tables.version() + 1;
        self.journal.lock().append(&JournalEntry::Schema {
            version,
            changes: changes.to_vec(),
        })?;
        tables.apply_schema(changes);
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
        self.journal
            .lock()
            .append(&JournalEntry::Batch(batch.clone()))?;
        tables.apply(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSpec;
    use recliner_codec::value;
    use tempfile::tempdir;

    fn schema() -> Vec<SchemaChange> {
        vec![SchemaChange::CreateStore(
            StoreSpec::new("docs", "_id").with_index(IndexSpec::new("n")),
        )]
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        {
            let b = FileBackend::open("db", &path, false).unwrap();
            b.upgrade(&schema()).unwrap();
            b.put("docs", value!({"_id": "a", "n": 1})).unwrap();
            b.put("docs", value!({"_id": "b", "n": 2})).unwrap();
            b.delete("docs", value!("a")).unwrap();
        }
        let b = FileBackend::open("db", &path, false).unwrap();
        assert_eq!(b.version(), 1);
        assert_eq!(b.get("docs", &value!("a")).unwrap(), None);
        assert_eq!(b.get("docs", &value!("b")).unwrap(), Some(value!({"_id": "b", "n": 2})));
        assert_eq!(b.count("docs", Some("n"), &KeyRange::only(2)).unwrap(), 1);
    }

    #[test]
    fn rejected_batch_is_not_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        let b = FileBackend::open("db", &path, false).unwrap();
        b.upgrade(&schema()).unwrap();
        let size = b.journal_size().unwrap();
        assert!(b.put("docs", value!({"missing": "id"})).is_err());
        assert_eq!(b.journal_size().unwrap(), size);
    }

    #[test]
    fn compact_keeps_live_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        {
            let b = FileBackend::open("db", &path, false).unwrap();
            b.upgrade(&schema()).unwrap();
            for i in 0..20 {
                b.put("docs", value!({"_id": "same", "n": i})).unwrap();
            }
            let before = b.journal_size().unwrap();
            b.compact().unwrap();
            assert!(b.journal_size().unwrap() < before);
            b.put("docs", value!({"_id": "after", "n": 100})).unwrap();
        }
        let b = FileBackend::open("db", &path, false).unwrap();
        assert_eq!(b.version(), 1);
        assert_eq!(b.get("docs", &value!("same")).unwrap(), Some(value!({"_id": "same", "n": 19})));
        assert!(b.get("docs", &value!("after")).unwrap().is_some());
    }
}
