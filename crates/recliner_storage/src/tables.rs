//! In-memory table state shared by every backend.

use crate::backend::{ScanControl, ScanEntry, ScanRequest};
use crate::batch::{WriteBatch, WriteOp};
use crate::error::{StorageError, StorageResult};
use crate::key::Key;
use crate::range::{bounds_are_empty, resume_bounds, Direction, KeyRange};
use crate::schema::{IndexSpec, SchemaChange, StoreSpec};
use recliner_codec::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

struct Index {
    spec: IndexSpec,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    /// Index keys produced by one record. Records without a valid value at
    /// the key path are simply not indexed.
    fn keys_for(&self, record: &Value) -> Vec<Key> {
        let Some(value) = record.get_path(&self.spec.key_path) else {
            return Vec::new();
        };
        match value {
            Value::Array(items) if self.spec.multi_entry => {
                let distinct: BTreeSet<Key> =
                    items.iter().cloned().filter_map(Key::new).collect();
                distinct.into_iter().collect()
            }
            other => Key::new(other.clone()).into_iter().collect(),
        }
    }

    fn add(&mut self, pk: &Key, record: &Value) {
        for key in self.keys_for(record) {
            self.entries.entry(key).or_default().insert(pk.clone());
        }
    }

    fn remove(&mut self, pk: &Key, record: &Value) {
        for key in self.keys_for(record) {
            if let Some(pks) = self.entries.get_mut(&key) {
                pks.remove(pk);
                if pks.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

struct Table {
    spec: StoreSpec,
    rows: BTreeMap<Key, Value>,
    indexes: BTreeMap<String, Index>,
}

impl Table {
    fn new(spec: StoreSpec) -> Self {
        let indexes = spec
            .indexes
            .iter()
            .map(|i| (i.name.clone(), Index::new(i.clone())))
            .collect();
        Self {
            spec,
            rows: BTreeMap::new(),
            indexes,
        }
    }

    fn primary_key(&self, record: &Value) -> StorageResult<Key> {
        let value = record.get_path(&self.spec.key_path).ok_or_else(|| {
            StorageError::invalid_key(
                &self.spec.name,
                format!("record has no {}", self.spec.key_path),
            )
        })?;
        Key::new(value.clone()).ok_or_else(|| {
            StorageError::invalid_key(
                &self.spec.name,
                format!("{} is a {}", self.spec.key_path, value.type_name()),
            )
        })
    }

    fn put(&mut self, record: Value) -> StorageResult<()> {
        let pk = self.primary_key(&record)?;
        self.delete(&pk);
        for index in self.indexes.values_mut() {
            index.add(&pk, &record);
        }
        self.rows.insert(pk, record);
        Ok(())
    }

    fn delete(&mut self, pk: &Key) {
        if let Some(old) = self.rows.remove(pk) {
            for index in self.indexes.values_mut() {
                index.remove(pk, &old);
            }
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    fn add_index(&mut self, spec: IndexSpec) {
        if self.indexes.contains_key(&spec.name) {
            return;
        }
        let mut index = Index::new(spec.clone());
        for (pk, record) in &self.rows {
            index.add(pk, record);
        }
        self.spec.indexes.push(spec.clone());
        self.indexes.insert(spec.name, index);
    }

    fn index(&self, name: &str) -> StorageResult<&Index> {
        self.indexes
            .get(name)
            .ok_or_else(|| StorageError::UnknownIndex {
                store: self.spec.name.clone(),
                index: name.to_string(),
            })
    }
}

/// Every store of one database, plus its schema version.
#[derive(Default)]
pub(crate) struct Tables {
    version: u64,
    stores: BTreeMap<String, Table>,
}

impl Tables {
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn specs(&self) -> Vec<StoreSpec> {
        self.stores.values().map(|t| t.spec.clone()).collect()
    }

    fn table(&self, store: &str) -> StorageResult<&Table> {
        self.stores
            .get(store)
            .ok_or_else(|| StorageError::unknown_store(store))
    }

    /// Checks a schema upgrade without applying it.
    pub(crate) fn validate_schema(&self, changes: &[SchemaChange]) -> StorageResult<()> {
        let mut created: BTreeSet<&str> = BTreeSet::new();
        for change in changes {
            match change {
                SchemaChange::CreateStore(spec) => {
                    created.insert(&spec.name);
                }
                SchemaChange::CreateIndex { store, .. }
                | SchemaChange::DeleteIndex { store, .. } => {
                    if !self.stores.contains_key(store) && !created.contains(store.as_str()) {
                        return Err(StorageError::unknown_store(store));
                    }
                }
                SchemaChange::DeleteStore(_) => {}
            }
        }
        Ok(())
    }

    pub(crate) fn apply_schema(&mut self, changes: &[SchemaChange]) {
        for change in changes {
            match change {
                SchemaChange::CreateStore(spec) => {
                    if let Some(table) = self.stores.get_mut(&spec.name) {
                        for index in &spec.indexes {
                            table.add_index(index.clone());
                        }
                    } else {
                        self.stores
                            .insert(spec.name.clone(), Table::new(spec.clone()));
                    }
                }
                SchemaChange::DeleteStore(name) => {
                    self.stores.remove(name);
                }
                SchemaChange::CreateIndex { store, index } => {
                    if let Some(table) = self.stores.get_mut(store) {
                        table.add_index(index.clone());
                    }
                }
                SchemaChange::DeleteIndex { store, index } => {
                    if let Some(table) = self.stores.get_mut(store) {
                        table.indexes.remove(index);
                        table.spec.indexes.retain(|i| &i.name != index);
                    }
                }
            }
        }
    }

    /// Checks every op of a batch so that applying it cannot fail halfway.
    pub(crate) fn validate(&self, batch: &WriteBatch) -> StorageResult<()> {
        for op in batch.ops() {
            match op {
                WriteOp::Put { store, value } => {
                    self.table(store)?.primary_key(value)?;
                }
                WriteOp::Delete { store, key } => {
                    self.table(store)?;
                    if Key::new(key.clone()).is_none() {
                        return Err(StorageError::invalid_key(store, "delete key is not a key"));
                    }
                }
                WriteOp::Clear { store } => {
                    self.table(store)?;
                }
            }
        }
        Ok(())
    }

    /// Applies a batch that already passed [`Tables::validate`].
    pub(crate) fn apply(&mut self, batch: WriteBatch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { store, value } => {
                    self.table_mut(&store)?.put(value)?;
                }
                WriteOp::Delete { store, key } => {
                    if let Some(pk) = Key::new(key) {
                        self.table_mut(&store)?.delete(&pk);
                    }
                }
                WriteOp::Clear { store } => {
                    self.table_mut(&store)?.clear();
                }
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, store: &str) -> StorageResult<&mut Table> {
        self.stores
            .get_mut(store)
            .ok_or_else(|| StorageError::unknown_store(store))
    }

    pub(crate) fn get(&self, store: &str, key: &Value) -> StorageResult<Option<Value>> {
        let table = self.table(store)?;
        Ok(Key::new(key.clone()).and_then(|pk| table.rows.get(&pk).cloned()))
    }

    pub(crate) fn count(
        &self,
        store: &str,
        index: Option<&str>,
        range: &KeyRange,
    ) -> StorageResult<usize> {
        let table = self.table(store)?;
        let (lower, upper) = range
            .to_key_bounds()
            .ok_or_else(|| StorageError::invalid_key(store, "range bound is not a key"))?;
        if bounds_are_empty(&lower, &upper) {
            return Ok(0);
        }
        Ok(match index {
            None => table.rows.range((lower, upper)).count(),
            Some(name) => table
                .index(name)?
                .entries
                .range((lower, upper))
                .map(|(_, pks)| pks.len())
                .sum(),
        })
    }

    pub(crate) fn scan(
        &self,
        request: &ScanRequest,
        visitor: &mut dyn FnMut(ScanEntry<'_>) -> ScanControl,
    ) -> StorageResult<()> {
        let store = request.store.as_str();
        let table = self.table(store)?;
        let (mut lower, mut upper) = request
            .range
            .to_key_bounds()
            .ok_or_else(|| StorageError::invalid_key(store, "range bound is not a key"))?;

        let after = match &request.after {
            Some((key, pk)) => {
                let key = Key::new(key.clone())
                    .ok_or_else(|| StorageError::invalid_key(store, "resume key is not a key"))?;
                let pk = Key::new(pk.clone()).ok_or_else(|| {
                    StorageError::invalid_key(store, "resume primary key is not a key")
                })?;
                (lower, upper) = resume_bounds(lower, upper, &key, request.direction);
                Some((key, pk))
            }
            None => None,
        };
        if bounds_are_empty(&lower, &upper) {
            return Ok(());
        }

        // Positions at or before the resume point in scan order are skipped.
        let passed = |key: &Key, pk: &Key| match &after {
            None => false,
            Some((ak, apk)) => match request.direction {
                Direction::Next => key < ak || (key == ak && pk <= apk),
                Direction::Prev => key > ak || (key == ak && pk >= apk),
            },
        };

        match &request.index {
            None => {
                let iter = table.rows.range((lower, upper));
                let iter: Box<dyn Iterator<Item = (&Key, &Value)>> = match request.direction {
                    Direction::Next => Box::new(iter),
                    Direction::Prev => Box::new(iter.rev()),
                };
                for (pk, value) in iter {
                    if passed(pk, pk) {
                        continue;
                    }
                    let entry = ScanEntry {
                        key: pk.value(),
                        primary_key: pk.value(),
                        value,
                    };
                    if visitor(entry) == ScanControl::Stop {
                        break;
                    }
                }
            }
            Some(name) => {
                let index = table.index(name)?;
                let iter = index.entries.range((lower, upper));
                let iter: Box<dyn Iterator<Item = (&Key, &BTreeSet<Key>)>> =
                    match request.direction {
                        Direction::Next => Box::new(iter),
                        Direction::Prev => Box::new(iter.rev()),
                    };
                'outer: for (key, pks) in iter {
                    let pks: Box<dyn Iterator<Item = &Key>> = match request.direction {
                        Direction::Next => Box::new(pks.iter()),
                        Direction::Prev => Box::new(pks.iter().rev()),
                    };
                    for pk in pks {
                        if passed(key, pk) {
                            continue;
                        }
                        let Some(value) = table.rows.get(pk) else {
                            continue;
                        };
                        let entry = ScanEntry {
                            key: key.value(),
                            primary_key: pk.value(),
                            value,
                        };
                        if visitor(entry) == ScanControl::Stop {
                            break 'outer;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the whole state as schema plus one put per row.
    pub(crate) fn snapshot(&self) -> (Vec<SchemaChange>, WriteBatch) {
        let schema = self
            .stores
            .values()
            .map(|t| SchemaChange::CreateStore(t.spec.clone()))
            .collect();
        let mut batch = WriteBatch::new();
        for (name, table) in &self.stores {
            for row in table.rows.values() {
                batch.put(name.clone(), row.clone());
            }
        }
        (schema, batch)
    }
}
