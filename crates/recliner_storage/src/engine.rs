//! Engines that open, list and destroy named databases.
//!
//! A file engine lays out its data directory as:
//!
//! ```text
//! <root>/
//! ├─ LOCK                   # Advisory lock for single-process access
//! └─ <hex(name)>.journal    # One journal per database
//! ```

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::MemoryBackend;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const JOURNAL_EXT: &str = "journal";

/// Opens databases by name.
///
/// Opening a name that does not exist yet creates an empty database at
/// schema version 0. Repeated opens return the same handle.
pub trait StorageEngine: Send + Sync {
    /// Opens (or creates) a database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or replayed.
    fn open(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>>;

    /// Erases a database. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if its files cannot be removed.
    fn destroy(&self, name: &str) -> StorageResult<bool>;

    /// Lists the databases that exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be read.
    fn names(&self) -> StorageResult<Vec<String>>;
}

/// Engine whose databases live only in memory.
#[derive(Default)]
pub struct MemoryEngine {
    databases: Mutex<BTreeMap<String, Arc<MemoryBackend>>>,
}

impl MemoryEngine {
    /// Creates an engine with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut databases = self.databases.lock();
        let backend = databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new(name)))
            .clone();
        Ok(backend)
    }

    fn destroy(&self, name: &str) -> StorageResult<bool> {
        Ok(self.databases.lock().remove(name).is_some())
    }

    fn names(&self) -> StorageResult<Vec<String>> {
        Ok(self.databases.lock().keys().cloned().collect())
    }
}

/// Engine that keeps one journal file per database in a data directory.
///
/// The directory is locked for the lifetime of the engine so only one
/// process writes to it.
pub struct FileEngine {
    root: PathBuf,
    sync_on_commit: bool,
    databases: Mutex<BTreeMap<String, Arc<FileBackend>>>,
    _lock_file: File,
}

fn file_stem(name: &str) -> String {
    name.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn name_from_stem(stem: &str) -> Option<String> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

impl FileEngine {
    /// Opens (creating if needed) and locks a data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// or an I/O error.
    pub fn open(root: &Path, sync_on_commit: bool) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }
        Ok(Self {
            root: root.to_path_buf(),
            sync_on_commit,
            databases: Mutex::new(BTreeMap::new()),
            _lock_file: lock_file,
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn journal_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_stem(name), JOURNAL_EXT))
    }

    /// Compacts every open database's journal.
    ///
    /// # Errors
    ///
    /// Returns the first compaction error.
    pub fn compact_all(&self) -> StorageResult<()> {
        let open: Vec<_> = self.databases.lock().values().cloned().collect();
        for backend in open {
            backend.compact()?;
        }
        Ok(())
    }
}

impl StorageEngine for FileEngine {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut databases = self.databases.lock();
        if let Some(backend) = databases.get(name) {
            return Ok(backend.clone());
        }
        let backend = Arc::new(FileBackend::open(
            name,
            &self.journal_path(name),
            self.sync_on_commit,
        )?);
        databases.insert(name.to_string(), backend.clone());
        Ok(backend)
    }

    fn destroy(&self, name: &str) -> StorageResult<bool> {
        self.databases.lock().remove(name);
        let path = self.journal_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn names(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXT) {
                continue;
            }
            if let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(name_from_stem)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaChange, StoreSpec};
    use recliner_codec::value;
    use tempfile::tempdir;

    #[test]
    fn stem_roundtrip() {
        for name in ["people", "_system", "a/b$c"] {
            assert_eq!(name_from_stem(&file_stem(name)).as_deref(), Some(name));
        }
        assert_eq!(name_from_stem("abc"), None);
    }

    #[test]
    fn memory_engine_lifecycle() {
        let engine = MemoryEngine::new();
        let a = engine.open("a").unwrap();
        a.upgrade(&[SchemaChange::CreateStore(StoreSpec::new("s", "k"))])
            .unwrap();
        assert_eq!(engine.open("a").unwrap().version(), 1);
        assert_eq!(engine.names().unwrap(), vec!["a".to_string()]);
        assert!(engine.destroy("a").unwrap());
        assert!(!engine.destroy("a").unwrap());
        assert_eq!(engine.open("a").unwrap().version(), 0);
    }

    #[test]
    fn file_engine_persists_and_locks() {
        let dir = tempdir().unwrap();
        {
            let engine = FileEngine::open(dir.path(), false).unwrap();
            assert!(matches!(
                FileEngine::open(dir.path(), false),
                Err(StorageError::Locked)
            ));
            let db = engine.open("people/eu").unwrap();
            db.upgrade(&[SchemaChange::CreateStore(StoreSpec::new("docs", "_id"))])
                .unwrap();
            db.put("docs", value!({"_id": "x"})).unwrap();
        }
        let engine = FileEngine::open(dir.path(), false).unwrap();
        assert_eq!(engine.names().unwrap(), vec!["people/eu".to_string()]);
        let db = engine.open("people/eu").unwrap();
        assert!(db.get("docs", &value!("x")).unwrap().is_some());
        assert!(engine.destroy("people/eu").unwrap());
        assert!(engine.names().unwrap().is_empty());
    }
}
