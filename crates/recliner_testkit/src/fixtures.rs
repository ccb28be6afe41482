//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use recliner_core::{Config, Database, Recliner};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Name of the database every fixture creates.
pub const TEST_DB: &str = "test";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The instance owning the database.
    pub recliner: Arc<Recliner>,
    /// The database instance.
    pub db: Arc<Database>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::with_recliner(
            Recliner::in_memory().expect("Failed to open in-memory instance"),
            None,
        )
    }

    /// Creates a new file-backed test database in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recliner =
            Recliner::open(temp_dir.path(), Config::default()).expect("Failed to open instance");
        Self::with_recliner(recliner, Some(temp_dir))
    }

    fn with_recliner(recliner: Recliner, temp_dir: Option<TempDir>) -> Self {
        let recliner = Arc::new(recliner);
        let db = recliner
            .create_database(TEST_DB)
            .expect("Failed to create test database");
        Self {
            recliner,
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the data directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(|d| d.path())
    }

    /// Closes and reopens a file-backed instance, returning the reopened
    /// test database.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory fixture.
    pub fn reopen(self) -> Self {
        let temp_dir = self._temp_dir.expect("Only file databases can be reopened");
        drop(self.db);
        drop(self.recliner);
        let recliner = Arc::new(
            Recliner::open(temp_dir.path(), Config::default()).expect("Failed to reopen instance"),
        );
        let db = recliner.database(TEST_DB).expect("Test database missing after reopen");
        Self {
            recliner,
            db,
            _temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use recliner_codec::value;

    /// Creates a database holding `count` documents `doc0000..` with
    /// `n`, `even` and `tag` fields.
    pub fn populated_database(count: usize) -> TestDatabase {
        let db = TestDatabase::memory();
        populate(&db, count);
        db
    }

    /// Writes `count` numbered documents into `db`.
    pub fn populate(db: &Database, count: usize) {
        for i in 0..count {
            db.put(
                &format!("doc{i:04}"),
                value!({"n": i, "even": i % 2 == 0, "tag": format!("t{}", i % 7)}),
                None,
            )
            .expect("Failed to write document");
        }
    }

    /// Creates a small people database with an index on `age`.
    pub fn people() -> TestDatabase {
        let db = TestDatabase::memory();
        let people = [
            ("alice", "Alice", 31, "Oslo"),
            ("bob", "Bob", 25, "Lima"),
            ("carol", "Carol", 42, "Oslo"),
            ("dave", "Dave", 19, "Pune"),
        ];
        for (id, name, age, city) in people {
            db.put(
                id,
                value!({"name": name, "age": age, "address": {"city": city}}),
                None,
            )
            .expect("Failed to write person");
        }
        db.create_index(&recliner_core::IndexRequest::on(["age"]).ddoc("people"))
            .expect("Failed to create index");
        db
    }
}
