//! Typed access to one record store of a database.

use crate::document::{ID_FIELD, REV_FIELD};
use crate::error::{CoreError, CoreResult};
use recliner_codec::Value;
use recliner_storage::{KeyRange, ScanRequest, StorageBackend, WriteBatch};
use std::sync::Arc;

/// Reads and writes the records of one store, keyed by `_id`.
///
/// The store performs no revision bookkeeping of its own; the versioned
/// document path in [`crate::Database`] stages its writes through
/// [`DocumentStore::stage_put`] so that a document row, its revision chain
/// and its change record commit together.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StorageBackend>,
    store: &'static str,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("database", &self.backend.name())
            .field("store", &self.store)
            .finish()
    }
}

impl DocumentStore {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>, store: &'static str) -> Self {
        Self { backend, store }
    }

    /// Returns the store name.
    pub fn name(&self) -> &'static str {
        self.store
    }

    /// Reads a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage read fails.
    pub fn read(&self, id: &str) -> CoreResult<Option<Value>> {
        Ok(self.backend.get(self.store, &Value::from(id))?)
    }

    /// Reads every record whose indexed `field` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if `value` is not a valid key, or an error if
    /// the store has no index on `field`.
    pub fn read_by_index(&self, field: &str, value: &Value) -> CoreResult<Vec<Value>> {
        if !recliner_storage::is_valid_key(value) {
            return Err(CoreError::bad_request(format!(
                "{field} lookup value is not a key"
            )));
        }
        let request = ScanRequest::new(self.store)
            .index(field)
            .range(KeyRange::only(value.clone()));
        Ok(self.backend.collect(&request, None)?)
    }

    /// Inserts a record that must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a record with the same id exists.
    pub fn create(&self, record: Value) -> CoreResult<()> {
        let id = record
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::bad_request("record has no string _id"))?;
        if let Some(existing) = self.read(id)? {
            let rev = existing
                .get(REV_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string);
            return Err(CoreError::conflict(format!("{id} already exists"), rev));
        }
        self.backend.put(self.store, record)?;
        Ok(())
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no `_id` or the write fails.
    pub fn put(&self, record: Value) -> CoreResult<()> {
        self.backend.put(self.store, record)?;
        Ok(())
    }

    /// Replaces a record with `transform(current)`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record does not exist, or whatever the
    /// transform returns.
    pub fn update<F>(&self, id: &str, transform: F) -> CoreResult<Value>
    where
        F: FnOnce(Value) -> CoreResult<Value>,
    {
        let current = self
            .read(id)?
            .ok_or_else(|| CoreError::not_found(format!("{} {id}", self.store)))?;
        let next = transform(current)?;
        self.backend.put(self.store, next.clone())?;
        Ok(next)
    }

    /// Deletes a record. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn delete(&self, id: &str) -> CoreResult<bool> {
        if self.read(id)?.is_none() {
            return Ok(false);
        }
        self.backend.delete(self.store, Value::from(id))?;
        Ok(true)
    }

    /// Returns every record in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub fn all(&self) -> CoreResult<Vec<Value>> {
        Ok(self.backend.collect(&ScanRequest::new(self.store), None)?)
    }

    /// Counts the records of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.backend.count(self.store, None, &KeyRange::all())?)
    }

    /// Adds a put of `record` to `batch`.
    pub fn stage_put(&self, batch: &mut WriteBatch, record: Value) {
        batch.put(self.store, record);
    }

    /// Adds a delete of `id` to `batch`.
    pub fn stage_delete(&self, batch: &mut WriteBatch, id: &str) {
        batch.delete(self.store, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{initial_schema, DOCS, LOCAL};
    use recliner_codec::value;
    use recliner_storage::{IndexSpec, MemoryBackend, SchemaChange};

    fn store(name: &'static str) -> DocumentStore {
        let backend = Arc::new(MemoryBackend::new("t"));
        backend.upgrade(&initial_schema()).unwrap();
        DocumentStore::new(backend, name)
    }

    #[test]
    fn create_rejects_duplicates() {
        let locals = store(LOCAL);
        locals.create(value!({"_id": "a", "_rev": "0-1"})).unwrap();
        let err = locals.create(value!({"_id": "a"})).unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.current_rev(), Some("0-1"));
    }

    #[test]
    fn update_applies_transform() {
        let locals = store(LOCAL);
        locals.put(value!({"_id": "a", "n": 1})).unwrap();
        let next = locals
            .update("a", |mut v| {
                v.set_path("n", Value::from(2));
                Ok(v)
            })
            .unwrap();
        assert_eq!(next.get("n"), Some(&Value::from(2)));
        assert!(locals.update("missing", Ok).is_err());
    }

    #[test]
    fn read_by_index_value() {
        let docs = store(DOCS);
        docs.backend
            .upgrade(&[SchemaChange::CreateIndex {
                store: DOCS.into(),
                index: IndexSpec::new("city"),
            }])
            .unwrap();
        docs.put(value!({"_id": "a", "city": "Oslo"})).unwrap();
        docs.put(value!({"_id": "b", "city": "Rome"})).unwrap();
        let found = docs.read_by_index("city", &Value::from("Oslo")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(docs.read_by_index("city", &Value::Null).is_err());
    }

    #[test]
    fn delete_reports_existence() {
        let locals = store(LOCAL);
        locals.put(value!({"_id": "a"})).unwrap();
        assert!(locals.delete("a").unwrap());
        assert!(!locals.delete("a").unwrap());
        assert_eq!(locals.count().unwrap(), 0);
    }
}
