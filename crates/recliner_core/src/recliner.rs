//! The Recliner instance: a set of named databases over one storage engine.

use crate::config::Config;
use crate::database::{Database, DatabaseInfo};
use crate::design::DbDesign;
use crate::error::{CoreError, CoreResult};
use crate::registry::{Registry, SYSTEM_DB};
use parking_lot::RwLock;
use recliner_codec::Value;
use recliner_storage::{FileEngine, MemoryEngine, StorageEngine};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Returns true if `name` is a legal database name: a lowercase letter
/// followed by lowercase letters, digits or any of `_$()+-/`.
pub fn is_valid_db_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Greeting returned by [`Recliner::server_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Always `"Welcome"`.
    pub recliner: String,
    /// Crate version.
    pub version: String,
    /// Vendor name.
    pub vendor: String,
    /// Identifier of this instance.
    pub uuid: String,
}

/// An embedded Recliner instance.
///
/// ```
/// use recliner_codec::value;
/// use recliner_core::Recliner;
///
/// let recliner = Recliner::in_memory().unwrap();
/// let db = recliner.create_database("people").unwrap();
/// let res = db.post(value!({"name": "Alice"})).unwrap();
/// assert!(res.rev.starts_with("1-"));
/// assert_eq!(recliner.all_databases(), vec!["people".to_string()]);
/// ```
pub struct Recliner {
    engine: Arc<dyn StorageEngine>,
    config: Config,
    registry: Arc<Registry>,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
    uuid: Uuid,
}

impl std::fmt::Debug for Recliner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recliner")
            .field("uuid", &self.uuid)
            .field("databases", &self.all_databases())
            .finish()
    }
}

impl Recliner {
    /// Creates an instance whose databases live in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the system database cannot be initialised.
    pub fn in_memory() -> CoreResult<Self> {
        Self::with_engine(Arc::new(MemoryEngine::new()), Config::default())
    }

    /// Opens a file-backed instance in `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked by another process or
    /// a journal cannot be replayed.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let engine = FileEngine::open(path, config.sync_on_commit)?;
        Self::with_engine(Arc::new(engine), config)
    }

    /// Creates an instance over any storage engine, reopening every
    /// database the registry knows about.
    ///
    /// # Errors
    ///
    /// Returns an error if the system database or a registered database
    /// cannot be opened.
    pub fn with_engine(engine: Arc<dyn StorageEngine>, config: Config) -> CoreResult<Self> {
        let registry = Arc::new(Registry::open(engine.open(SYSTEM_DB)?)?);
        let mut databases = BTreeMap::new();
        for name in registry.names()? {
            let db = Database::open_with_registry(
                engine.open(&name)?,
                config.clone(),
                Some(registry.clone()),
            )?;
            match registry.design(&name) {
                Ok(design) => db.set_extension(design),
                Err(e) => warn!(db = %name, error = %e, "ignoring unreadable extension bundle"),
            }
            databases.insert(name, Arc::new(db));
        }
        info!(databases = databases.len(), "recliner opened");
        Ok(Self {
            engine,
            config,
            registry,
            databases: RwLock::new(databases),
            uuid: Uuid::new_v4(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if the name is not legal
    /// - `PreconditionFailed` if the database already exists
    pub fn create_database(&self, name: &str) -> CoreResult<Arc<Database>> {
        if !is_valid_db_name(name) {
            return Err(CoreError::bad_request(format!("illegal database name: {name}")));
        }
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(CoreError::precondition(format!("database {name} already exists")));
        }
        let db = Arc::new(Database::open_with_registry(
            self.engine.open(name)?,
            self.config.clone(),
            Some(self.registry.clone()),
        )?);
        self.registry.record(name, db.version())?;
        databases.insert(name.to_string(), db.clone());
        info!(db = name, "database created");
        Ok(db)
    }

    /// Returns an open database.
    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    /// Returns a database, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// See [`Recliner::create_database`].
    pub fn ensure_database(&self, name: &str) -> CoreResult<Arc<Database>> {
        if let Some(db) = self.database(name) {
            return Ok(db);
        }
        match self.create_database(name) {
            Err(CoreError::PreconditionFailed { .. }) => self
                .database(name)
                .ok_or_else(|| CoreError::internal(format!("database {name} vanished"))),
            other => other,
        }
    }

    /// Returns true if the database exists.
    pub fn database_exists(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Deletes a database with all its documents.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn delete_database(&self, name: &str) -> CoreResult<()> {
        let mut databases = self.databases.write();
        if databases.remove(name).is_none() {
            return Err(CoreError::not_found(format!("database {name}")));
        }
        self.engine.destroy(name)?;
        self.registry.remove(name)?;
        info!(db = name, "database deleted");
        Ok(())
    }

    /// Lists database names in ascending order.
    pub fn all_databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Returns a database's statistics.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn database_info(&self, name: &str) -> CoreResult<DatabaseInfo> {
        self.require(name)?.info()
    }

    /// Returns the instance greeting.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            recliner: "Welcome".to_string(),
            version: crate::VERSION.to_string(),
            vendor: "Recliner".to_string(),
            uuid: self.uuid.simple().to_string(),
        }
    }

    fn require(&self, name: &str) -> CoreResult<Arc<Database>> {
        self.database(name)
            .ok_or_else(|| CoreError::not_found(format!("database {name}")))
    }

    /// Installs an extension bundle (validation rules, update functions,
    /// named queries, reducers, view filters) on a database.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown database and `BadRequest` for a
    /// malformed bundle.
    pub fn put_db_design(&self, name: &str, design: &Value) -> CoreResult<()> {
        let db = self.require(name)?;
        let design = DbDesign::from_value(design)?;
        self.registry.put_design(name, &design)?;
        db.set_extension(Some(design));
        info!(db = name, "extension bundle installed");
        Ok(())
    }

    /// Returns the extension bundle of a database.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown database.
    pub fn get_db_design(&self, name: &str) -> CoreResult<Option<DbDesign>> {
        Ok(self.require(name)?.extension())
    }

    /// Removes the extension bundle of a database.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the database or its bundle does not exist.
    pub fn delete_db_design(&self, name: &str) -> CoreResult<()> {
        let db = self.require(name)?;
        if !self.registry.delete_design(name)? {
            return Err(CoreError::not_found(format!("design of database {name}")));
        }
        db.set_extension(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;

    #[test]
    fn database_names() {
        assert!(is_valid_db_name("people"));
        assert!(is_valid_db_name("a1_$()+-/x"));
        assert!(!is_valid_db_name("People"));
        assert!(!is_valid_db_name("1abc"));
        assert!(!is_valid_db_name(""));
    }

    #[test]
    fn lifecycle() {
        let r = Recliner::in_memory().unwrap();
        r.create_database("b").unwrap();
        r.create_database("a").unwrap();
        assert_eq!(r.all_databases(), vec!["a", "b"]);
        assert_eq!(r.create_database("a").unwrap_err().status_code(), 412);
        assert_eq!(r.create_database("Bad").unwrap_err().status_code(), 400);

        r.delete_database("a").unwrap();
        assert!(!r.database_exists("a"));
        assert_eq!(r.delete_database("a").unwrap_err().status_code(), 404);
        assert_eq!(r.database_info("a").unwrap_err().status_code(), 404);

        let again = r.ensure_database("a").unwrap();
        assert_eq!(again.info().unwrap().doc_count, 0);
    }

    #[test]
    fn server_info_greets() {
        let r = Recliner::in_memory().unwrap();
        let info = r.server_info();
        assert_eq!(info.recliner, "Welcome");
        assert_eq!(info.uuid.len(), 32);
    }

    #[test]
    fn db_design_installs_extension() {
        let r = Recliner::in_memory().unwrap();
        let db = r.create_database("people").unwrap();
        r.put_db_design("people", &value!({"validate": [{"required": ["name"]}]}))
            .unwrap();
        assert!(db.post(value!({})).is_err());
        assert!(r.get_db_design("people").unwrap().is_some());
        r.delete_db_design("people").unwrap();
        assert!(db.post(value!({})).is_ok());
        assert!(r.delete_db_design("people").is_err());
        assert!(r.put_db_design("people", &value!({"x_bad": 1})).is_err());
    }
}
