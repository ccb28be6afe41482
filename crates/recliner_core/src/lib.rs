//! # Recliner Core
//!
//! Embedded, offline-first JSON document databases.
//!
//! This crate provides:
//! - [`Recliner`], a set of named databases over one storage engine
//! - [`Database`]: document CRUD under revision control, bulk writes,
//!   local documents, attachments and design documents
//! - the selector engine ([`selector`]) and the query planner behind
//!   [`Database::find`]
//! - the change feed ([`Database::changes`]) that replication reads
//!
//! Every write to a document names the revision it replaces. A stale
//! revision is rejected with [`CoreError::Conflict`], which carries the
//! current revision so the caller can re-read and retry.
//!
//! ## Usage
//!
//! ```
//! use recliner_codec::value;
//! use recliner_core::{FindQuery, IndexRequest, Recliner};
//!
//! let recliner = Recliner::in_memory().unwrap();
//! let db = recliner.create_database("people").unwrap();
//! db.create_index(&IndexRequest::on(["age"])).unwrap();
//! db.post(value!({"name": "Alice", "age": 31})).unwrap();
//! db.post(value!({"name": "Bob", "age": 17})).unwrap();
//!
//! let adults = db
//!     .find(&FindQuery::new(value!({"age": {"$gte": 18}})).fields(["name"]))
//!     .unwrap();
//! assert_eq!(adults.docs.len(), 1);
//! assert_eq!(adults.docs[0].get("name"), Some(&value!("Alice")));
//! ```
//!
//! Selectors can also be evaluated directly:
//!
//! ```
//! use recliner_codec::value;
//! use recliner_core::selector::{flatten, matches};
//!
//! let selector = flatten(&value!({"tags_m": {"$in": ["rust"]}})).unwrap();
//! assert!(matches(&value!({"tags_m": ["go", "rust"]}), &selector));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachments;
mod bookmark;
mod changes;
mod config;
mod database;
mod design;
mod document;
mod error;
mod mvcc;
mod query;
mod recliner;
mod registry;
pub mod selector;
mod store;
mod stores;

pub use attachments::{attachment_infos, Attachment, AttachmentInfo};
pub use bookmark::{Bookmark, NIL};
pub use changes::{
    parse_seq, seq_number, ChangeDoc, ChangeFeed, ChangeRecord, ChangesFilter, ChangesRequest,
    ChangesResponse, RevEntry,
};
pub use config::Config;
pub use database::{
    AllDocsRequest, AllDocsResponse, AllDocsRow, AllDocsValue, BulkDocResult, Database,
    DatabaseInfo, QueryOutput, ReadOptions, RevsDiff,
};
pub use design::{
    design_id, has_view, indexed_fields, view_sort, DbDesign, IndexDefinition, IndexRequest,
    IndexResponse, Reducer, UpdateFunction, ValidationRule, QUERY_LANGUAGE,
};
pub use document::{
    doc_id, doc_rev, is_deleted, is_design_id, DocWriteResponse, Revision, ATTACHMENTS_FIELD,
    DELETED_FIELD, DESIGN_PREFIX, ID_FIELD, LOCAL_PREFIX, REVISIONS_FIELD, REV_FIELD,
};
pub use error::{CoreError, CoreResult};
pub use mvcc::{content_hash, next_revision, RevisionChain, Revisions};
pub use query::{
    parse_sort, parse_use_index, project, ExecutionStats, FindQuery, FindResult,
};
pub use recliner::{is_valid_db_name, Recliner, ServerInfo};
pub use registry::SYSTEM_DB;
pub use store::DocumentStore;

/// Crate version, reported by `server_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
