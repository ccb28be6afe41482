//! A single Recliner database.
//!
//! Every versioned write (a document, a tombstone, a design) runs under a
//! per-document lock and commits the document row, its revision chain,
//! its change record and any attachment bytes in one storage batch. The
//! change sequence is allocated under the database commit lock, so the
//! order of the change log is the order writes became visible.

use crate::attachments::{self, attachment_infos, blob_bytes, blob_record, Attachment};
use crate::changes::{read_changes, update_seq, ChangeFeed, ChangesRequest, ChangesResponse};
use crate::config::Config;
use crate::design::{
    design_id, has_view, indexed_fields, view_sort, DbDesign, IndexRequest, IndexResponse,
    QUERY_PREFIX, REDUCER_PREFIX,
};
use crate::document::{
    doc_id, doc_rev, into_body, is_deleted, is_design_id, DocWriteResponse, Revision,
    ATTACHMENTS_FIELD, DELETED_FIELD, ID_FIELD, LOCAL_PREFIX, REVISIONS_FIELD, REV_FIELD,
};
use crate::error::{CoreError, CoreResult};
use crate::mvcc::{chain_for_replicated, next_revision, RevisionChain, Revisions};
use crate::query::{is_queryable, parse_use_index, FindContext, FindQuery, FindResult};
use crate::registry::Registry;
use crate::selector::is_multi_entry;
use crate::store::DocumentStore;
use crate::stores::{initial_schema, ATTACHMENTS, CHANGES, DESIGN, DOCS, LOCAL, MVCC};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use recliner_codec::{from_value, to_value, Map, Value};
use recliner_storage::{
    Direction, IndexSpec, ScanControl, ScanRequest, SchemaChange, StorageBackend, WriteBatch,
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const LOCK_STRIPES: usize = 64;

/// Summary of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub db_name: String,
    /// Sequence of the last change.
    pub update_seq: String,
    /// Number of live documents.
    pub doc_count: usize,
    /// Schema version.
    pub version: u64,
}

/// Options for reading one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Attach the `_revisions` ancestry.
    pub revs: bool,
    /// Return tombstones instead of `None`.
    pub deleted: bool,
}

/// Outcome of one document of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocResult {
    /// True when the document was written.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ok: bool,
    /// Document id.
    pub id: String,
    /// New revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Error name when the document was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the document was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkDocResult {
    fn written(id: &str, rev: &Revision) -> Self {
        Self {
            ok: true,
            id: id.to_string(),
            rev: Some(rev.to_string()),
            error: None,
            reason: None,
        }
    }

    fn rejected(id: &str, error: &CoreError) -> Self {
        Self {
            ok: false,
            id: id.to_string(),
            rev: None,
            error: Some(error.error_name().to_string()),
            reason: Some(error.to_string()),
        }
    }
}

/// An `all_docs` request.
#[derive(Debug, Clone, Default)]
pub struct AllDocsRequest {
    /// Only these ids, in this order; unknown ids produce error rows.
    pub keys: Option<Vec<String>>,
    /// Attach document bodies.
    pub include_docs: bool,
    /// Reverse id order.
    pub descending: bool,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Rows to pass over first.
    pub skip: usize,
}

/// `value` of an `all_docs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllDocsValue {
    /// Current revision.
    pub rev: String,
    /// Whether the document is a tombstone.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// One row of `all_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsRow {
    /// Document id; absent on error rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Requested key.
    pub key: String,
    /// Revision summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AllDocsValue>,
    /// Document body, when requested and live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    /// `not_found` for unknown keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `all_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsResponse {
    /// Number of live documents in the database.
    pub total_rows: usize,
    /// Rows skipped.
    pub offset: usize,
    /// Result rows.
    pub rows: Vec<AllDocsRow>,
}

/// Revisions of one document the database lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevsDiff {
    /// Revisions that differ from the current one.
    pub missing: Vec<String>,
}

/// Output of a named query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Matching documents.
    pub docs: Vec<Value>,
    /// Reducer result, when the query has a reducer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced: Option<Value>,
}

/// How a write assigns its revision.
#[derive(Debug, Clone, Copy)]
enum Edit<'a> {
    /// A local edit: requires the current revision and generates the next.
    New { expected: Option<&'a str> },
    /// A create that fails on a live document (POST).
    Create,
    /// A replicated write: takes `_rev` (and `_revisions`) verbatim.
    Replicated,
}

/// A write ready to be staged.
struct Prepared {
    id: String,
    doc: Value,
    rev: Revision,
    chain: RevisionChain,
    deleted: bool,
    blobs: WriteBatch,
}

/// A Recliner database.
pub struct Database {
    name: String,
    backend: Arc<dyn StorageBackend>,
    config: Config,
    docs: DocumentStore,
    locals: DocumentStore,
    designs: DocumentStore,
    blobs: DocumentStore,
    chains: DocumentStore,
    feed: ChangeFeed,
    commit_lock: Mutex<()>,
    doc_locks: Vec<Mutex<()>>,
    extension: RwLock<Option<DbDesign>>,
    registry: Option<Arc<Registry>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("version", &self.backend.version())
            .finish()
    }
}

impl Database {
    /// Opens a database over a storage backend, creating its stores on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created or the change log
    /// cannot be read.
    pub fn open(backend: Arc<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        Self::open_with_registry(backend, config, None)
    }

    pub(crate) fn open_with_registry(
        backend: Arc<dyn StorageBackend>,
        config: Config,
        registry: Option<Arc<Registry>>,
    ) -> CoreResult<Self> {
        if !backend.stores().iter().any(|s| s.name == DOCS) {
            backend.upgrade(&initial_schema())?;
        }
        let feed = ChangeFeed::open(backend.as_ref())?;
        let store = |name| DocumentStore::new(backend.clone(), name);
        Ok(Self {
            name: backend.name().to_string(),
            docs: store(DOCS),
            locals: store(LOCAL),
            designs: store(DESIGN),
            blobs: store(ATTACHMENTS),
            chains: store(MVCC),
            feed,
            commit_lock: Mutex::new(()),
            doc_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            extension: RwLock::new(None),
            registry,
            backend,
            config,
        })
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the schema version.
    pub fn version(&self) -> u64 {
        self.backend.version()
    }

    /// Returns the document store (current documents and tombstones).
    pub fn documents(&self) -> &DocumentStore {
        &self.docs
    }

    fn stripe(id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % LOCK_STRIPES as u64) as usize
    }

    fn lock_doc(&self, id: &str) -> MutexGuard<'_, ()> {
        self.doc_locks[Self::stripe(id)].lock()
    }

    /// Locks the stripes of several ids in ascending order.
    fn lock_docs<'a>(&self, ids: impl Iterator<Item = &'a str>) -> Vec<MutexGuard<'_, ()>> {
        let stripes: BTreeSet<usize> = ids.map(Self::stripe).collect();
        stripes.into_iter().map(|s| self.doc_locks[s].lock()).collect()
    }

    /// Commits `batch` together with one change record per write.
    fn commit(&self, mut batch: WriteBatch, writes: &[(String, String, bool)]) -> CoreResult<()> {
        let _commit = self.commit_lock.lock();
        let mut records = Vec::with_capacity(writes.len());
        for (id, rev, deleted) in writes {
            let record = self.feed.next_record(id, rev, *deleted);
            batch.put(CHANGES, record.to_record()?);
            records.push(record);
        }
        if let Err(e) = self.backend.commit(batch) {
            for record in records.iter().rev() {
                self.feed.release(record);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn read_chain(&self, id: &str) -> CoreResult<Option<RevisionChain>> {
        match self.chains.read(id)? {
            Some(raw) => Ok(Some(from_value(&raw)?)),
            None => Ok(None),
        }
    }

    fn validate_id(id: &str) -> CoreResult<()> {
        if id.is_empty() {
            return Err(CoreError::bad_request("document id must not be empty"));
        }
        if id.starts_with('_') && !is_design_id(id) {
            return Err(CoreError::bad_request(format!(
                "only design documents may have ids starting with _: {id}"
            )));
        }
        Ok(())
    }

    /// Computes the row, revision and chain of a write against `current`.
    fn prepare(
        &self,
        id: &str,
        mut body: Map,
        current: Option<&Value>,
        chain: Option<RevisionChain>,
        edit: Edit<'_>,
        validate: bool,
    ) -> CoreResult<Prepared> {
        let live = current.filter(|c| !is_deleted(c));
        let current_rev = current.and_then(doc_rev).map(str::to_string);
        let deleted = body.get(DELETED_FIELD).is_some_and(Value::is_truthy);
        let cap = self.config.max_revision_history;

        let body_rev = body.get(REV_FIELD).and_then(Value::as_str).map(str::to_string);
        let mut blobs = WriteBatch::new();

        let (rev, chain) = match edit {
            Edit::Replicated => {
                let rev: Revision = body_rev
                    .as_deref()
                    .ok_or_else(|| CoreError::bad_request(format!("{id} has no _rev")))?
                    .parse()?;
                let chain = chain_for_replicated(chain, &Value::Object(body.clone()), &rev, cap);
                attachments::absorb(&mut body, current, &mut blobs)?;
                (rev, chain)
            }
            Edit::New { .. } | Edit::Create => {
                let expected = match edit {
                    Edit::New { expected } => expected.map(str::to_string).or(body_rev),
                    _ => None,
                };
                if let Some(live) = live {
                    let live_rev = doc_rev(live).map(str::to_string);
                    match expected {
                        None if matches!(edit, Edit::Create) => {
                            return Err(CoreError::conflict(
                                format!("document {id} already exists"),
                                live_rev,
                            ));
                        }
                        None => {
                            return Err(CoreError::bad_request_with_rev(
                                format!("updating {id} requires its current _rev"),
                                live_rev,
                            ));
                        }
                        Some(expected) if Some(&expected) != live_rev.as_ref() => {
                            return Err(CoreError::conflict(
                                format!("document update conflict on {id}"),
                                live_rev,
                            ));
                        }
                        Some(_) => {}
                    }
                } else if current.is_none() && expected.is_some() {
                    return Err(CoreError::conflict(
                        format!("document {id} does not exist"),
                        None,
                    ));
                }
                if validate {
                    if let Some(ext) = self.extension.read().as_ref() {
                        if deleted {
                            ext.check_delete()?;
                        } else {
                            ext.check_write(&Value::Object(body.clone()), live)?;
                        }
                    }
                }
                attachments::absorb(&mut body, current, &mut blobs)?;

                let mut content = Map::with_capacity(body.len() + 1);
                content.insert(ID_FIELD, id);
                for (k, v) in body.iter() {
                    if !matches!(k, ID_FIELD | REV_FIELD | REVISIONS_FIELD | DELETED_FIELD) {
                        content.insert(k, v.clone());
                    }
                }
                if deleted {
                    content.insert(DELETED_FIELD, true);
                }
                let prior: Option<Revision> = current_rev.as_deref().map(str::parse).transpose()?;
                let rev = next_revision(prior.as_ref(), &Value::Object(content))?;
                let mut chain = chain.unwrap_or_else(|| RevisionChain::new(id));
                chain.record(&rev, cap);
                (rev, chain)
            }
        };

        let mut doc = Map::with_capacity(body.len() + 1);
        doc.insert(ID_FIELD, id);
        doc.insert(REV_FIELD, rev.to_string());
        for (k, v) in body.iter() {
            if !matches!(k, ID_FIELD | REV_FIELD | REVISIONS_FIELD | DELETED_FIELD) {
                doc.insert(k, v.clone());
            }
        }
        if deleted {
            doc.insert(DELETED_FIELD, true);
        }
        Ok(Prepared {
            id: id.to_string(),
            doc: Value::Object(doc),
            rev,
            chain,
            deleted,
            blobs,
        })
    }

    /// Stages a prepared write and returns its change tuple.
    fn stage(
        &self,
        batch: &mut WriteBatch,
        prepared: Prepared,
    ) -> CoreResult<(String, String, bool)> {
        batch.extend(prepared.blobs);
        self.docs.stage_put(batch, prepared.doc);
        self.chains.stage_put(batch, to_value(&prepared.chain)?);
        Ok((prepared.id, prepared.rev.to_string(), prepared.deleted))
    }

    fn write_one(&self, id: &str, body: Map, edit: Edit<'_>) -> CoreResult<DocWriteResponse> {
        let _guard = self.lock_doc(id);
        let current = self.docs.read(id)?;
        let chain = self.read_chain(id)?;
        let prepared = self.prepare(id, body, current.as_ref(), chain, edit, true)?;
        let rev = prepared.rev.to_string();
        let mut batch = WriteBatch::new();
        let change = self.stage(&mut batch, prepared)?;
        self.commit(batch, &[change])?;
        debug!(db = %self.name, id, rev = %rev, "document written");
        Ok(DocWriteResponse::new(id, rev))
    }

    /// Returns database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn info(&self) -> CoreResult<DatabaseInfo> {
        let mut doc_count = 0;
        self.backend.scan(&ScanRequest::new(DOCS), &mut |entry| {
            if !is_deleted(entry.value) {
                doc_count += 1;
            }
            ScanControl::Continue
        })?;
        Ok(DatabaseInfo {
            db_name: self.name.clone(),
            update_seq: self.update_seq()?,
            doc_count,
            version: self.version(),
        })
    }

    /// Creates a document, generating an id when the body has none.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` with the current revision if a live document has
    /// the id, `BadRequest` for a malformed body, `ValidationFailed` if a
    /// validation rule rejects it.
    pub fn post(&self, doc: Value) -> CoreResult<DocWriteResponse> {
        let body = into_body(doc)?;
        let id = match body.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(CoreError::bad_request("_id must be a string")),
            None => Uuid::new_v4().simple().to_string(),
        };
        if is_design_id(&id) {
            return self.put_design(Value::Object(body), true);
        }
        Self::validate_id(&id)?;
        self.write_one(&id, body, Edit::Create)
    }

    /// Creates or updates a document as a local edit.
    ///
    /// `rev` (or the body's `_rev`) must name the current revision when the
    /// document exists. Ids under `_design/` install a design; ids under
    /// `_local/` write a local document.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if the body is not an object, its `_id` or `_rev`
    ///   disagree with the arguments, or an update lacks a revision
    /// - `Conflict` with the current revision if `rev` is stale
    /// - `ValidationFailed` if a validation rule rejects the write
    pub fn put(&self, id: &str, doc: Value, rev: Option<&str>) -> CoreResult<DocWriteResponse> {
        if id.starts_with(LOCAL_PREFIX) {
            return self.put_local(id, doc);
        }
        let mut body = into_body(doc)?;
        let current_rev = || self.current_rev(id).ok().flatten();
        if let Some(body_id) = body.get(ID_FIELD) {
            if body_id.as_str() != Some(id) {
                return Err(CoreError::bad_request_with_rev(
                    format!("body _id does not match {id}"),
                    current_rev(),
                ));
            }
        }
        if let (Some(rev), Some(body_rev)) = (rev, body.get(REV_FIELD)) {
            if body_rev.as_str() != Some(rev) {
                return Err(CoreError::bad_request_with_rev(
                    "body _rev does not match the requested revision",
                    current_rev(),
                ));
            }
        }
        if is_design_id(id) {
            body.insert(ID_FIELD, id);
            if let Some(rev) = rev {
                body.insert(REV_FIELD, rev);
            }
            return self.put_design(Value::Object(body), true);
        }
        Self::validate_id(id)?;
        self.write_one(id, body, Edit::New { expected: rev })
    }

    /// Writes a replicated document, keeping its `_rev` and `_revisions`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the body lacks `_id` or a valid `_rev`.
    pub fn put_replicated(&self, doc: Value) -> CoreResult<DocWriteResponse> {
        let body = into_body(doc)?;
        let id = body
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::bad_request("replicated document has no _id"))?
            .to_string();
        if is_design_id(&id) {
            return self.put_design(Value::Object(body), false);
        }
        Self::validate_id(&id)?;
        self.write_one(&id, body, Edit::Replicated)
    }

    /// Reads a live document.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get(&self, id: &str) -> CoreResult<Option<Value>> {
        self.open_doc(id, ReadOptions::default())
    }

    /// Reads a live document with its `_revisions` ancestry.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get_with_revisions(&self, id: &str) -> CoreResult<Option<Value>> {
        self.open_doc(
            id,
            ReadOptions {
                revs: true,
                deleted: false,
            },
        )
    }

    /// Reads a document with options.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn open_doc(&self, id: &str, options: ReadOptions) -> CoreResult<Option<Value>> {
        let Some(mut doc) = self.docs.read(id)? else {
            return Ok(None);
        };
        if is_deleted(&doc) && !options.deleted {
            return Ok(None);
        }
        if options.revs {
            if let (Some(chain), Some(map)) = (self.read_chain(id)?, doc.as_object_mut()) {
                map.insert(REVISIONS_FIELD, to_value(&chain.revisions)?);
            }
        }
        Ok(Some(doc))
    }

    /// Returns the current revision of a live document.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn current_rev(&self, id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .get(id)?
            .as_ref()
            .and_then(doc_rev)
            .map(str::to_string))
    }

    /// Deletes a document, leaving a tombstone that keeps `keep_fields`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no live document
    /// - `BadRequest` if `rev` is missing
    /// - `Conflict` with the current revision if `rev` is stale
    /// - `ValidationFailed` if deletions are forbidden
    pub fn delete(
        &self,
        id: &str,
        rev: Option<&str>,
        keep_fields: &[String],
    ) -> CoreResult<DocWriteResponse> {
        if id.starts_with(LOCAL_PREFIX) {
            self.delete_local(id)?;
            return Ok(DocWriteResponse::new(id, "0-0"));
        }
        let current = self
            .get(id)?
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        let mut kept = Value::Object(Map::new());
        for field in keep_fields {
            if let Some(value) = current.get_path(field) {
                kept.set_path(field, value.clone());
            }
        }
        let mut tombstone = kept.into_object().unwrap_or_default();
        tombstone.insert(DELETED_FIELD, true);
        if let Some(rev) = rev {
            tombstone.insert(REV_FIELD, rev);
        }
        if is_design_id(id) {
            tombstone.insert(ID_FIELD, id);
            return self.put_design(Value::Object(tombstone), true);
        }
        let rev = rev.ok_or_else(|| {
            CoreError::bad_request_with_rev(
                format!("deleting {id} requires its current _rev"),
                doc_rev(&current).map(str::to_string),
            )
        })?;
        self.write_one(id, tombstone, Edit::New { expected: Some(rev) })
    }

    /// Writes many documents in one atomic batch.
    ///
    /// Documents rejected by revision checks or validation are reported
    /// and skipped; the rest commit together. With `new_edits` false every
    /// document keeps its `_rev`. Design documents are installed one by
    /// one after the batch.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing written, if storage fails.
    pub fn bulk_docs(&self, docs: Vec<Value>, new_edits: bool) -> CoreResult<Vec<BulkDocResult>> {
        let mut results: Vec<Option<BulkDocResult>> = vec![None; docs.len()];
        let mut items = Vec::with_capacity(docs.len());
        let mut designs = Vec::new();
        for (slot, doc) in docs.into_iter().enumerate() {
            let id = doc_id(&doc).map(str::to_string);
            match (id, doc.into_object()) {
                (Some(id), Some(body)) if is_design_id(&id) => designs.push((slot, id, body)),
                (Some(id), Some(body)) => items.push((slot, id, body)),
                (None, Some(body)) if new_edits => {
                    items.push((slot, Uuid::new_v4().simple().to_string(), body));
                }
                (id, _) => {
                    let id = id.unwrap_or_default();
                    let err = CoreError::bad_request("document must be an object with an _id");
                    results[slot] = Some(BulkDocResult::rejected(&id, &err));
                }
            }
        }

        {
            let _guards = self.lock_docs(items.iter().map(|(_, id, _)| id.as_str()));
            let mut pending: HashMap<String, (Value, RevisionChain)> = HashMap::new();
            let mut batch = WriteBatch::new();
            let mut changes = Vec::with_capacity(items.len());
            for (slot, id, body) in items {
                let outcome = Self::validate_id(&id).and_then(|()| {
                    let (current, chain) = match pending.get(&id) {
                        Some((doc, chain)) => (Some(doc.clone()), Some(chain.clone())),
                        None => (self.docs.read(&id)?, self.read_chain(&id)?),
                    };
                    let edit = if new_edits {
                        Edit::New { expected: None }
                    } else {
                        Edit::Replicated
                    };
                    self.prepare(&id, body, current.as_ref(), chain, edit, new_edits)
                });
                match outcome {
                    Ok(prepared) => {
                        results[slot] = Some(BulkDocResult::written(&id, &prepared.rev));
                        pending.insert(id, (prepared.doc.clone(), prepared.chain.clone()));
                        changes.push(self.stage(&mut batch, prepared)?);
                    }
                    Err(e) if e.status_code() >= 500 => return Err(e),
                    Err(e) => results[slot] = Some(BulkDocResult::rejected(&id, &e)),
                }
            }
            if !changes.is_empty() {
                self.commit(batch, &changes)?;
            }
        }

        for (slot, id, body) in designs {
            results[slot] = Some(match self.put_design(Value::Object(body), new_edits) {
                Ok(r) => BulkDocResult {
                    ok: true,
                    id,
                    rev: Some(r.rev),
                    error: None,
                    reason: None,
                },
                Err(e) if e.status_code() >= 500 => return Err(e),
                Err(e) => BulkDocResult::rejected(&id, &e),
            });
        }
        debug!(db = %self.name, count = results.len(), "bulk write");
        Ok(results.into_iter().flatten().collect())
    }

    /// Lists documents in id order, or the requested ids.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn all_docs(&self, request: &AllDocsRequest) -> CoreResult<AllDocsResponse> {
        let total_rows = self.info()?.doc_count;
        let row = |key: &str, doc: Option<Value>| -> AllDocsRow {
            match doc {
                Some(doc) => {
                    let deleted = is_deleted(&doc);
                    AllDocsRow {
                        id: Some(key.to_string()),
                        key: key.to_string(),
                        value: Some(AllDocsValue {
                            rev: doc_rev(&doc).unwrap_or_default().to_string(),
                            deleted,
                        }),
                        doc: (request.include_docs && !deleted).then_some(doc),
                        error: None,
                    }
                }
                None => AllDocsRow {
                    id: None,
                    key: key.to_string(),
                    value: None,
                    doc: None,
                    error: Some("not_found".to_string()),
                },
            }
        };

        let mut rows = Vec::new();
        match &request.keys {
            Some(keys) => {
                for key in keys {
                    rows.push(row(key, self.docs.read(key)?));
                }
            }
            None => {
                let direction = if request.descending {
                    Direction::Prev
                } else {
                    Direction::Next
                };
                let scan = ScanRequest::new(DOCS).direction(direction);
                for doc in self.backend.collect(&scan, None)? {
                    if is_deleted(&doc) {
                        continue;
                    }
                    let id = doc_id(&doc).unwrap_or_default().to_string();
                    rows.push(row(&id, Some(doc)));
                }
            }
        }
        let rows: Vec<AllDocsRow> = rows
            .into_iter()
            .skip(request.skip)
            .take(request.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(AllDocsResponse {
            total_rows,
            offset: request.skip,
            rows,
        })
    }

    /// Reports, per id, the given revisions that are not the current one.
    ///
    /// Ids whose revisions are all current are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<String>>,
    ) -> CoreResult<BTreeMap<String, RevsDiff>> {
        let mut out = BTreeMap::new();
        for (id, wanted) in revs {
            let current = self.docs.read(id)?;
            let current_rev = current.as_ref().and_then(doc_rev);
            let missing: Vec<String> = wanted
                .iter()
                .filter(|r| Some(r.as_str()) != current_rev)
                .cloned()
                .collect();
            if !missing.is_empty() {
                out.insert(id.clone(), RevsDiff { missing });
            }
        }
        Ok(out)
    }

    /// Reads a page of the change feed.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed `since` or selector.
    pub fn changes(&self, request: &ChangesRequest) -> CoreResult<ChangesResponse> {
        read_changes(
            self.backend.as_ref(),
            &self.feed,
            &self.docs,
            request,
            self.config.default_changes_limit,
        )
    }

    /// Returns the sequence of the last change, or `"0"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    pub fn update_seq(&self) -> CoreResult<String> {
        update_seq(self.backend.as_ref())
    }

    /// Returns a document's revision ancestry.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn revision_chain(&self, id: &str) -> CoreResult<Option<Revisions>> {
        Ok(self.read_chain(id)?.map(|c| c.revisions))
    }

    /// Replaces a document's revision ancestry with one from another
    /// database, ahead of applying that database's revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn overwrite_revision_chain(&self, id: &str, revisions: Revisions) -> CoreResult<()> {
        let _guard = self.lock_doc(id);
        let mut chain = self.read_chain(id)?.unwrap_or_else(|| RevisionChain::new(id));
        chain.replace(revisions, self.config.max_revision_history);
        self.chains.put(to_value(&chain)?)
    }

    fn local_id(id: &str) -> String {
        if id.starts_with(LOCAL_PREFIX) {
            id.to_string()
        } else {
            format!("{LOCAL_PREFIX}{id}")
        }
    }

    /// Reads a local document.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get_local(&self, id: &str) -> CoreResult<Option<Value>> {
        self.locals.read(&Self::local_id(id))
    }

    /// Writes a local document. Local documents are not versioned beyond a
    /// `0-<n>` counter and never appear in the change feed.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the body is not an object.
    pub fn put_local(&self, id: &str, doc: Value) -> CoreResult<DocWriteResponse> {
        let id = Self::local_id(id);
        let mut body = into_body(doc)?;
        let _guard = self.lock_doc(&id);
        let n = self
            .locals
            .read(&id)?
            .as_ref()
            .and_then(doc_rev)
            .and_then(|r| r.strip_prefix("0-"))
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        let rev = format!("0-{}", n + 1);
        body.insert(ID_FIELD, id.as_str());
        body.insert(REV_FIELD, rev.as_str());
        self.locals.put(Value::Object(body))?;
        Ok(DocWriteResponse::new(id, rev))
    }

    /// Deletes a local document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn delete_local(&self, id: &str) -> CoreResult<()> {
        let id = Self::local_id(id);
        if self.locals.delete(&id)? {
            Ok(())
        } else {
            Err(CoreError::not_found(format!("local document {id}")))
        }
    }

    /// Returns the fields with a secondary index on the document store.
    pub fn indexes(&self) -> Vec<String> {
        self.backend
            .stores()
            .into_iter()
            .find(|s| s.name == DOCS)
            .map(|s| s.indexes.into_iter().map(|i| i.name).collect())
            .unwrap_or_default()
    }

    /// Installs, updates or (with `_deleted`) removes a design document.
    ///
    /// The design is recorded once in the change feed and copied into the
    /// document store so that it replicates. Every field its views declare
    /// gets a secondary index, and the schema version is bumped.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `_id` does not start with `_design/`
    /// - `Conflict` if `new_edits` and `_rev` is not the current revision
    pub fn put_design(&self, ddoc: Value, new_edits: bool) -> CoreResult<DocWriteResponse> {
        let body = into_body(ddoc)?;
        let id = body
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| is_design_id(id))
            .ok_or_else(|| CoreError::bad_request("design document _id must start with _design/"))?
            .to_string();

        let prepared = {
            let _guard = self.lock_doc(&id);
            let current = self.docs.read(&id)?;
            let chain = self.read_chain(&id)?;
            let edit = if new_edits {
                Edit::New { expected: None }
            } else {
                Edit::Replicated
            };
            let prepared = self.prepare(&id, body, current.as_ref(), chain, edit, false)?;
            let design = prepared.doc.clone();
            let deleted = prepared.deleted;
            let response = DocWriteResponse::new(&id, prepared.rev.to_string());
            let mut batch = WriteBatch::new();
            if deleted {
                self.designs.stage_delete(&mut batch, &id);
            } else {
                self.designs.stage_put(&mut batch, design.clone());
            }
            let change = self.stage(&mut batch, prepared)?;
            self.commit(batch, &[change])?;
            (response, design, deleted)
        };
        let (response, design, deleted) = prepared;

        let known = self.indexes();
        let changes: Vec<SchemaChange> = if deleted {
            Vec::new()
        } else {
            indexed_fields(&design)
                .into_iter()
                .filter(|f| !known.contains(f))
                .map(|field| SchemaChange::CreateIndex {
                    store: DOCS.to_string(),
                    index: IndexSpec::new(field.as_str()).multi_entry(is_multi_entry(&field)),
                })
                .collect()
        };
        let version = self.backend.upgrade(&changes)?;
        if let Some(registry) = &self.registry {
            registry.record(&self.name, version)?;
        }
        info!(
            db = %self.name,
            design = %id,
            version,
            new_indexes = changes.len(),
            "design installed"
        );
        Ok(response)
    }

    /// Reads an installed design by name or id.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get_design(&self, name: &str) -> CoreResult<Option<Value>> {
        self.designs.read(&design_id(name))
    }

    /// Returns the current revision of an installed design.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn design_exists(&self, name: &str) -> CoreResult<Option<String>> {
        Ok(self
            .get_design(name)?
            .as_ref()
            .and_then(doc_rev)
            .map(str::to_string))
    }

    /// Lists installed designs.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn designs(&self) -> CoreResult<Vec<Value>> {
        self.designs.all()
    }

    /// Creates a query index, adding its view to the named design.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed request.
    pub fn create_index(&self, request: &IndexRequest) -> CoreResult<IndexResponse> {
        let (design, view) = request.to_design()?;
        let id = doc_id(&design).unwrap_or_default().to_string();
        let new_view = design.get("views").and_then(|v| v.get(&view)).cloned();
        let mut result = "created";
        let to_write = match self.designs.read(&id)? {
            Some(existing) => {
                let existing_view = existing.get("views").and_then(|v| v.get(&view));
                if existing_view.is_some() && existing_view == new_view.as_ref() {
                    result = "exists";
                    None
                } else {
                    let mut merged = existing;
                    merged.set_path(&format!("views.{view}"), new_view.unwrap_or_default());
                    Some(merged)
                }
            }
            None => Some(design),
        };
        if let Some(design) = to_write {
            self.put_design(design, true)?;
        }
        Ok(IndexResponse {
            result: result.to_string(),
            id,
            name: view,
        })
    }

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed query or an unknown
    /// `use_index`.
    pub fn find(&self, query: &FindQuery) -> CoreResult<FindResult> {
        let default_sort = match &query.use_index {
            Some(hint) => {
                let (ddoc, view) = parse_use_index(hint)?;
                let design = self
                    .designs
                    .read(&ddoc)?
                    .ok_or_else(|| CoreError::bad_request(format!("unknown index {ddoc}")))?;
                match view {
                    Some(view) if !has_view(&design, &view) => {
                        return Err(CoreError::bad_request(format!(
                            "unknown index {view} in {ddoc}"
                        )));
                    }
                    Some(view) => view_sort(&design, &view),
                    None => None,
                }
            }
            None => None,
        };
        let indexes = self.indexes();
        FindContext {
            backend: self.backend.as_ref(),
            indexes: &indexes,
            threshold: self.config.index_threshold,
            default_sort,
        }
        .execute(query)
    }

    /// Adds or replaces an attachment, creating the document if needed.
    ///
    /// # Errors
    ///
    /// See [`Database::put`].
    pub fn put_attachment(
        &self,
        doc_id: &str,
        name: &str,
        rev: Option<&str>,
        content_type: &str,
        data: &[u8],
    ) -> CoreResult<DocWriteResponse> {
        let mut body = self
            .get(doc_id)?
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Some(map) = body.as_object_mut() {
            map.remove(REV_FIELD);
            if !map.get(ATTACHMENTS_FIELD).is_some_and(Value::is_object) {
                map.insert(ATTACHMENTS_FIELD, Value::Object(Map::new()));
            }
            if let Some(atts) = map.get_mut(ATTACHMENTS_FIELD).and_then(Value::as_object_mut) {
                let mut entry = Map::with_capacity(2);
                entry.insert("content_type", content_type);
                entry.insert("data", attachments_encode(data));
                atts.insert(name, Value::Object(entry));
            }
        }
        self.put(doc_id, body, rev)
    }

    /// Reads an attachment of a live document.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get_attachment(&self, doc_id: &str, name: &str) -> CoreResult<Option<Attachment>> {
        let Some(doc) = self.get(doc_id)? else {
            return Ok(None);
        };
        let Some((_, info)) = attachment_infos(&doc).into_iter().find(|(n, _)| n == name) else {
            return Ok(None);
        };
        let data = self.attachment_data(&info.rak)?;
        Ok(Some(Attachment { info, data }))
    }

    /// Removes an attachment, writing a new revision.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document or attachment does not exist,
    /// and otherwise see [`Database::put`].
    pub fn delete_attachment(
        &self,
        doc_id: &str,
        name: &str,
        rev: Option<&str>,
    ) -> CoreResult<DocWriteResponse> {
        let mut body = self
            .get(doc_id)?
            .ok_or_else(|| CoreError::not_found(format!("document {doc_id}")))?;
        let removed = body
            .as_object_mut()
            .and_then(|m| m.get_mut(ATTACHMENTS_FIELD))
            .and_then(Value::as_object_mut)
            .and_then(|atts| atts.remove(name));
        if removed.is_none() {
            return Err(CoreError::not_found(format!("attachment {doc_id}/{name}")));
        }
        if let Some(map) = body.as_object_mut() {
            map.remove(REV_FIELD);
        }
        self.put(doc_id, body, rev)
    }

    /// Reads stored attachment bytes by opaque key.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or the record is corrupt.
    pub fn attachment_data(&self, rak: &str) -> CoreResult<Option<Bytes>> {
        match self.blobs.read(rak)? {
            Some(record) => Ok(Some(blob_bytes(&record)?)),
            None => Ok(None),
        }
    }

    /// Stores attachment bytes under an opaque key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_attachment_data(&self, rak: &str, data: &[u8]) -> CoreResult<()> {
        self.blobs.put(blob_record(rak, data))
    }

    /// Returns the installed extension bundle.
    pub fn extension(&self) -> Option<DbDesign> {
        self.extension.read().clone()
    }

    pub(crate) fn set_extension(&self, design: Option<DbDesign>) {
        *self.extension.write() = design;
    }

    fn require_extension(&self) -> CoreResult<DbDesign> {
        self.extension()
            .ok_or_else(|| CoreError::not_found(format!("design of database {}", self.name)))
    }

    /// Applies a `u_*` update function to a document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown function or document, and
    /// otherwise see [`Database::put`].
    pub fn run_update(&self, name: &str, id: &str) -> CoreResult<DocWriteResponse> {
        let design = self.require_extension()?;
        let update = design
            .updates
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("update function {name}")))?;
        let doc = self
            .get(id)?
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        let rev = doc_rev(&doc).map(str::to_string);
        let updated = update.apply(doc)?;
        self.put(id, updated, rev.as_deref())
    }

    /// Runs an `m_*` named query and its `r_*` reducer, if any.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown query, and otherwise see
    /// [`Database::find`].
    pub fn run_query(&self, name: &str) -> CoreResult<QueryOutput> {
        let design = self.require_extension()?;
        let query = design
            .queries
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("query {name}")))?;
        let docs = self.find(query)?.docs;
        let reducer = name
            .strip_prefix(QUERY_PREFIX)
            .and_then(|suffix| design.reducers.get(&format!("{REDUCER_PREFIX}{suffix}")));
        Ok(QueryOutput {
            reduced: reducer.map(|r| r.reduce(&docs)),
            docs,
        })
    }

    /// Keeps the view rows passing every named `v_*` filter.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an unknown filter.
    pub fn filter_view_rows(&self, names: &[String], rows: Vec<Value>) -> CoreResult<Vec<Value>> {
        if names.is_empty() {
            return Ok(rows);
        }
        self.require_extension()?.filter_view_rows(names, rows)
    }

    /// Returns the live, non-design documents.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn queryable_docs(&self) -> CoreResult<Vec<Value>> {
        Ok(self
            .docs
            .all()?
            .into_iter()
            .filter(is_queryable)
            .collect())
    }
}

fn attachments_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;
    use recliner_storage::MemoryBackend;

    fn db() -> Database {
        Database::open(Arc::new(MemoryBackend::new("people")), Config::default()).unwrap()
    }

    #[test]
    fn post_then_get() {
        let db = db();
        let res = db.post(value!({"name": "Alice"})).unwrap();
        assert!(res.rev.starts_with("1-"));
        let doc = db.get(&res.id).unwrap().unwrap();
        assert_eq!(doc.get("_id").and_then(Value::as_str), Some(res.id.as_str()));
        assert_eq!(doc.get("_rev").and_then(Value::as_str), Some(res.rev.as_str()));
        assert_eq!(doc.get("name"), Some(&value!("Alice")));
        let keys: Vec<_> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["_id", "_rev", "name"]);
    }

    #[test]
    fn stale_rev_conflicts() {
        let db = db();
        let first = db.put("a", value!({"n": 1}), None).unwrap();
        let second = db.put("a", value!({"n": 2}), Some(&first.rev)).unwrap();
        assert!(second.rev.starts_with("2-"));
        let err = db.put("a", value!({"n": 3}), Some(&first.rev)).unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.current_rev(), Some(second.rev.as_str()));
    }

    #[test]
    fn update_without_rev_is_bad_request() {
        let db = db();
        let first = db.put("a", value!({}), None).unwrap();
        let err = db.put("a", value!({}), None).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.current_rev(), Some(first.rev.as_str()));
        let err = db
            .put("a", value!({"_id": "b"}), Some(&first.rev))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn post_existing_id_conflicts() {
        let db = db();
        let first = db.post(value!({"_id": "x"})).unwrap();
        let err = db.post(value!({"_id": "x"})).unwrap_err();
        assert_eq!(err.current_rev(), Some(first.rev.as_str()));
    }

    #[test]
    fn delete_leaves_tombstone() {
        let db = db();
        let first = db.put("a", value!({"name": "x", "kind": "k"}), None).unwrap();
        assert_eq!(db.delete("missing", Some("1-x"), &[]).unwrap_err().status_code(), 404);
        let gone = db.delete("a", Some(&first.rev), &["kind".to_string()]).unwrap();
        assert!(gone.rev.starts_with("2-"));
        assert!(db.get("a").unwrap().is_none());
        let tomb = db
            .open_doc("a", ReadOptions { revs: false, deleted: true })
            .unwrap()
            .unwrap();
        assert_eq!(tomb.get("_deleted"), Some(&value!(true)));
        assert_eq!(tomb.get("kind"), Some(&value!("k")));
        assert!(tomb.get("name").is_none());

        let again = db.put("a", value!({"name": "y"}), None).unwrap();
        assert!(again.rev.starts_with("3-"));
    }

    #[test]
    fn changes_record_every_write() {
        let db = db();
        let a = db.put("a", value!({}), None).unwrap();
        db.put("b", value!({}), None).unwrap();
        db.put("a", value!({"v": 2}), Some(&a.rev)).unwrap();
        let feed = db.changes(&ChangesRequest::since("0")).unwrap();
        let ids: Vec<_> = feed.results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "a"]);
        assert_eq!(feed.last_seq, db.update_seq().unwrap());
        assert!(feed.last_seq.starts_with("3-"));

        let since_first = db.changes(&ChangesRequest::since(feed.results[0].seq.clone())).unwrap();
        assert_eq!(since_first.results.len(), 2);
        let page = db.changes(&ChangesRequest::since("0").limit(1)).unwrap();
        assert_eq!(page.last_seq, feed.results[0].seq);
    }

    #[test]
    fn revisions_grow_newest_first() {
        let db = db();
        let a = db.put("a", value!({"v": 1}), None).unwrap();
        let b = db.put("a", value!({"v": 2}), Some(&a.rev)).unwrap();
        let doc = db.get_with_revisions("a").unwrap().unwrap();
        let revs: Revisions = from_value(doc.get("_revisions").unwrap()).unwrap();
        assert_eq!(revs.start, 2);
        let hashes: Vec<String> = [&b.rev, &a.rev]
            .iter()
            .map(|r| r.split_once('-').unwrap().1.to_string())
            .collect();
        assert_eq!(revs.ids, hashes);
    }

    #[test]
    fn replicated_write_keeps_rev() {
        let db = db();
        let res = db
            .put_replicated(value!({
                "_id": "r", "_rev": "3-ccc", "v": 1,
                "_revisions": {"start": 3, "ids": ["ccc", "bbb", "aaa"]}
            }))
            .unwrap();
        assert_eq!(res.rev, "3-ccc");
        let doc = db.get("r").unwrap().unwrap();
        assert!(doc.get("_revisions").is_none());
        assert_eq!(db.revision_chain("r").unwrap().unwrap().ids.len(), 3);
        assert!(db.put_replicated(value!({"_id": "r"})).is_err());
    }

    #[test]
    fn bulk_docs_reports_per_document() {
        let db = db();
        let existing = db.put("a", value!({}), None).unwrap();
        let results = db
            .bulk_docs(
                vec![
                    value!({"_id": "a", "v": 1}),
                    value!({"_id": "b"}),
                    value!({"_id": "a", "_rev": existing.rev, "v": 2}),
                    value!(3),
                ],
                true,
            )
            .unwrap();
        assert_eq!(results.len(), 4);
        assert!(!results[0].ok);
        assert!(results[1].ok);
        assert!(results[2].ok);
        assert!(results[2].rev.as_deref().unwrap().starts_with("2-"));
        assert_eq!(results[3].error.as_deref(), Some("bad_request"));
        assert_eq!(db.info().unwrap().doc_count, 2);
    }

    #[test]
    fn bulk_docs_chains_writes_to_same_id() {
        let db = db();
        let results = db
            .bulk_docs(
                vec![
                    value!({"_id": "x", "_rev": "1-a"}),
                    value!({"_id": "x", "_rev": "2-b"}),
                ],
                false,
            )
            .unwrap();
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(db.current_rev("x").unwrap().as_deref(), Some("2-b"));
        assert_eq!(db.revision_chain("x").unwrap().unwrap().ids, vec!["b", "a"]);
    }

    #[test]
    fn revs_diff_reports_non_current() {
        let db = db();
        let a = db.put("a", value!({}), None).unwrap();
        let mut request = BTreeMap::new();
        request.insert("a".to_string(), vec![a.rev.clone(), "9-zzz".to_string()]);
        request.insert("b".to_string(), vec!["1-x".to_string()]);
        let diff = db.revs_diff(&request).unwrap();
        assert_eq!(diff["a"].missing, vec!["9-zzz"]);
        assert_eq!(diff["b"].missing, vec!["1-x"]);

        request.remove("b");
        request.insert("a".to_string(), vec![a.rev]);
        assert!(db.revs_diff(&request).unwrap().is_empty());
    }

    #[test]
    fn local_docs_are_unversioned() {
        let db = db();
        let first = db.put_local("cp", value!({"seq": 1})).unwrap();
        assert_eq!(first.rev, "0-1");
        let second = db.put_local("_local/cp", value!({"seq": 2})).unwrap();
        assert_eq!(second.rev, "0-2");
        assert_eq!(db.get_local("cp").unwrap().unwrap().get("seq"), Some(&value!(2)));
        assert_eq!(db.update_seq().unwrap(), "0");
        db.delete_local("cp").unwrap();
        assert_eq!(db.delete_local("cp").unwrap_err().status_code(), 404);
    }

    #[test]
    fn design_install_creates_indexes_once_in_feed() {
        let db = db();
        let before = db.version();
        let res = db
            .create_index(&IndexRequest::on(["age"]).ddoc("people").name("by-age"))
            .unwrap();
        assert_eq!(res.result, "created");
        assert_eq!(res.id, "_design/people");
        assert!(db.indexes().contains(&"age".to_string()));
        assert!(db.version() > before);
        let again = db
            .create_index(&IndexRequest::on(["age"]).ddoc("people").name("by-age"))
            .unwrap();
        assert_eq!(again.result, "exists");

        let feed = db.changes(&ChangesRequest::since("0")).unwrap();
        assert_eq!(feed.results.len(), 1);
        assert_eq!(feed.results[0].id, "_design/people");
        assert!(db.design_exists("people").unwrap().is_some());
        assert_eq!(db.info().unwrap().doc_count, 1);
        assert!(db.queryable_docs().unwrap().is_empty());
    }

    #[test]
    fn design_ids_are_checked() {
        let db = db();
        assert!(db.put_design(value!({"_id": "people"}), true).is_err());
        assert!(db.put("_secret", value!({}), None).is_err());
    }

    #[test]
    fn attachments_roundtrip() {
        let db = db();
        let res = db
            .put_attachment("a", "note.txt", None, "text/plain", b"hello")
            .unwrap();
        let att = db.get_attachment("a", "note.txt").unwrap().unwrap();
        assert_eq!(att.info.length, 5);
        assert_eq!(att.data, Some(Bytes::from_static(b"hello")));
        let rak = att.info.rak.clone();

        let res = db
            .put_attachment("a", "other", Some(&res.rev), "text/plain", b"x")
            .unwrap();
        assert!(db.get_attachment("a", "note.txt").unwrap().is_some());

        db.delete_attachment("a", "note.txt", Some(&res.rev)).unwrap();
        assert!(db.get_attachment("a", "note.txt").unwrap().is_none());
        assert!(db.attachment_data(&rak).unwrap().is_none());
    }

    #[test]
    fn validation_extension_rejects_writes() {
        let db = db();
        db.set_extension(Some(
            DbDesign::from_value(&value!({
                "validate": [{"required": ["name"]}, {"forbid_delete": true}]
            }))
            .unwrap(),
        ));
        let err = db.post(value!({"age": 3})).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }));
        let ok = db.post(value!({"name": "x"})).unwrap();
        assert!(db.delete(&ok.id, Some(&ok.rev), &[]).is_err());
        assert!(db.put_replicated(value!({"_id": "r", "_rev": "1-a"})).is_ok());
    }

    #[test]
    fn update_functions_and_named_queries() {
        let db = db();
        db.set_extension(Some(
            DbDesign::from_value(&value!({
                "u_birthday": {"increment": {"age": 1}},
                "m_adults": {"selector": {"age": {"$gte": 18}}},
                "r_adults": {"sum": "age"}
            }))
            .unwrap(),
        ));
        db.put("a", value!({"age": 17}), None).unwrap();
        db.put("b", value!({"age": 30}), None).unwrap();
        let res = db.run_update("u_birthday", "a").unwrap();
        assert!(res.rev.starts_with("2-"));
        let out = db.run_query("m_adults").unwrap();
        assert_eq!(out.docs.len(), 2);
        assert_eq!(out.reduced, Some(value!(48)));
        assert_eq!(db.run_query("m_none").unwrap_err().status_code(), 404);
    }

    #[test]
    fn all_docs_rows() {
        let db = db();
        let a = db.put("a", value!({"v": 1}), None).unwrap();
        db.put("b", value!({}), None).unwrap();
        db.delete("a", Some(&a.rev), &[]).unwrap();
        let all = db.all_docs(&AllDocsRequest::default()).unwrap();
        assert_eq!(all.total_rows, 1);
        assert_eq!(all.rows.len(), 1);

        let keyed = db
            .all_docs(&AllDocsRequest {
                keys: Some(vec!["a".into(), "zzz".into()]),
                include_docs: true,
                ..AllDocsRequest::default()
            })
            .unwrap();
        assert!(keyed.rows[0].value.as_ref().unwrap().deleted);
        assert!(keyed.rows[0].doc.is_none());
        assert_eq!(keyed.rows[1].error.as_deref(), Some("not_found"));
    }
}
