//! The system database: registry of databases and their extension bundles.

use crate::design::DbDesign;
use crate::error::CoreResult;
use crate::store::DocumentStore;
use recliner_codec::{value, Value};
use recliner_storage::{SchemaChange, StorageBackend, StoreSpec};
use std::sync::Arc;

/// Name of the system database.
pub const SYSTEM_DB: &str = "_system";

const DB_INFO: &str = "_db_info";
const DB_DESIGN: &str = "_db_design";

/// Known databases (`_db_info`: name, schema version) and installed
/// extension bundles (`_db_design`).
#[derive(Debug)]
pub(crate) struct Registry {
    info: DocumentStore,
    designs: DocumentStore,
}

impl Registry {
    pub(crate) fn open(backend: Arc<dyn StorageBackend>) -> CoreResult<Self> {
        if !backend.stores().iter().any(|s| s.name == DB_INFO) {
            backend.upgrade(&[
                SchemaChange::CreateStore(StoreSpec::new(DB_INFO, "_id")),
                SchemaChange::CreateStore(StoreSpec::new(DB_DESIGN, "_id")),
            ])?;
        }
        Ok(Self {
            info: DocumentStore::new(backend.clone(), DB_INFO),
            designs: DocumentStore::new(backend, DB_DESIGN),
        })
    }

    /// Records a database and its current schema version.
    pub(crate) fn record(&self, name: &str, version: u64) -> CoreResult<()> {
        self.info.put(value!({"_id": name, "version": version}))
    }

    pub(crate) fn contains(&self, name: &str) -> CoreResult<bool> {
        Ok(self.info.read(name)?.is_some())
    }

    pub(crate) fn remove(&self, name: &str) -> CoreResult<()> {
        self.info.delete(name)?;
        self.designs.delete(name)?;
        Ok(())
    }

    pub(crate) fn names(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .info
            .all()?
            .iter()
            .filter_map(|r| r.get("_id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    pub(crate) fn put_design(&self, name: &str, design: &DbDesign) -> CoreResult<()> {
        self.designs
            .put(value!({"_id": name, "design": design.to_value()?}))
    }

    pub(crate) fn delete_design(&self, name: &str) -> CoreResult<bool> {
        self.designs.delete(name)
    }

    pub(crate) fn design(&self, name: &str) -> CoreResult<Option<DbDesign>> {
        match self.designs.read(name)? {
            Some(record) => {
                let design = record.get("design").cloned().unwrap_or_default();
                Ok(Some(DbDesign::from_value(&design)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_storage::MemoryBackend;

    #[test]
    fn records_and_lists_databases() {
        let registry = Registry::open(Arc::new(MemoryBackend::new(SYSTEM_DB))).unwrap();
        registry.record("people", 1).unwrap();
        registry.record("cars", 2).unwrap();
        registry.record("people", 3).unwrap();
        assert_eq!(registry.names().unwrap(), vec!["cars", "people"]);
        assert!(registry.contains("cars").unwrap());
        registry.remove("cars").unwrap();
        assert!(!registry.contains("cars").unwrap());
    }

    #[test]
    fn stores_designs() {
        let registry = Registry::open(Arc::new(MemoryBackend::new(SYSTEM_DB))).unwrap();
        let design = DbDesign::from_value(&value!({"validate": [{"required": ["name"]}]})).unwrap();
        registry.put_design("people", &design).unwrap();
        assert_eq!(registry.design("people").unwrap(), Some(design));
        assert!(registry.delete_design("people").unwrap());
        assert_eq!(registry.design("people").unwrap(), None);
    }
}
