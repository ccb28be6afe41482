//! Reserved record stores of a database.

use recliner_storage::{IndexSpec, SchemaChange, StoreSpec};

/// Current documents, including tombstones and copies of design documents.
pub const DOCS: &str = "_id";
/// Attachment bytes keyed by opaque attachment key.
pub const ATTACHMENTS: &str = "_attachments";
/// Change log keyed by auto-incrementing integer.
pub const CHANGES: &str = "_changes";
/// Local (unreplicated, unversioned) documents such as checkpoints.
pub const LOCAL: &str = "_local";
/// Installed design documents.
pub const DESIGN: &str = "_design";
/// Revision chains.
pub const MVCC: &str = "_mvcc";

/// Index of the change log on document id.
pub const CHANGES_BY_ID: &str = "id";

/// Schema of a fresh database.
pub(crate) fn initial_schema() -> Vec<SchemaChange> {
    vec![
        SchemaChange::CreateStore(StoreSpec::new(DOCS, "_id")),
        SchemaChange::CreateStore(StoreSpec::new(ATTACHMENTS, "_id")),
        SchemaChange::CreateStore(
            StoreSpec::new(CHANGES, "_id").with_index(IndexSpec::new(CHANGES_BY_ID)),
        ),
        SchemaChange::CreateStore(StoreSpec::new(LOCAL, "_id")),
        SchemaChange::CreateStore(StoreSpec::new(DESIGN, "_id")),
        SchemaChange::CreateStore(StoreSpec::new(MVCC, "_id")),
    ]
}
