//! # Recliner Storage
//!
//! The ordered storage substrate beneath Recliner databases.
//!
//! A database is a set of named record stores. Each store keys its
//! records by one field and may carry secondary indexes over other
//! fields. Indexes support counting over a [`KeyRange`] and directional
//! scans that can resume after a `(key, primary_key)` position. Writes go
//! through [`WriteBatch`]es, which apply atomically across stores.
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] / [`MemoryEngine`] - For tests and ephemeral data
//! - [`FileBackend`] / [`FileEngine`] - Journaled persistent storage
//!
//! ## Example
//!
//! ```rust
//! use recliner_codec::value;
//! use recliner_storage::{
//!     IndexSpec, KeyRange, MemoryEngine, ScanRequest, SchemaChange, StorageEngine, StoreSpec,
//! };
//!
//! let engine = MemoryEngine::new();
//! let db = engine.open("people").unwrap();
//! db.upgrade(&[SchemaChange::CreateStore(
//!     StoreSpec::new("docs", "_id").with_index(IndexSpec::new("age")),
//! )])
//! .unwrap();
//! db.put("docs", value!({"_id": "alice", "age": 31})).unwrap();
//! db.put("docs", value!({"_id": "bob", "age": 25})).unwrap();
//!
//! let request = ScanRequest::new("docs")
//!     .index("age")
//!     .range(KeyRange::upper_bound(30, false));
//! let young = db.collect(&request, None).unwrap();
//! assert_eq!(young.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod engine;
mod error;
mod file;
mod journal;
mod key;
mod memory;
mod range;
mod schema;
mod tables;

pub use backend::{ScanControl, ScanEntry, ScanRequest, StorageBackend};
pub use batch::{WriteBatch, WriteOp};
pub use engine::{FileEngine, MemoryEngine, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use key::{is_valid_key, Key};
pub use memory::MemoryBackend;
pub use range::{Direction, KeyRange};
pub use schema::{IndexSpec, SchemaChange, StoreSpec};
