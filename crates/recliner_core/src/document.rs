//! Document field conventions and revision identifiers.

use crate::error::{CoreError, CoreResult};
use recliner_codec::{Map, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Document id field.
pub const ID_FIELD: &str = "_id";
/// Revision field.
pub const REV_FIELD: &str = "_rev";
/// Tombstone flag.
pub const DELETED_FIELD: &str = "_deleted";
/// Revision chain attached by `revs=true` reads and replicated writes.
pub const REVISIONS_FIELD: &str = "_revisions";
/// Attachment map.
pub const ATTACHMENTS_FIELD: &str = "_attachments";
/// Prefix of design document ids.
pub const DESIGN_PREFIX: &str = "_design/";
/// Prefix of local document ids.
pub const LOCAL_PREFIX: &str = "_local/";

/// Returns true for ids of design documents.
pub fn is_design_id(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

/// Returns the document's `_id`, if it is a string.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Returns the document's `_rev`, if it is a string.
pub fn doc_rev(doc: &Value) -> Option<&str> {
    doc.get(REV_FIELD).and_then(Value::as_str)
}

/// Returns true if the document is a tombstone.
pub fn is_deleted(doc: &Value) -> bool {
    doc.get(DELETED_FIELD).is_some_and(Value::is_truthy)
}

/// Returns the document body as a map, or `BadRequest`.
pub(crate) fn into_body(doc: Value) -> CoreResult<Map> {
    doc.into_object()
        .ok_or_else(|| CoreError::bad_request("document must be a JSON object"))
}

/// A `<generation>-<hash>` revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    /// Number of writes to the document, starting at 1.
    pub generation: u64,
    /// Content hash of the revision.
    pub hash: String,
}

impl Revision {
    /// Creates a revision.
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        Self {
            generation,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for Revision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::bad_request(format!("invalid revision: {s}"));
        let (generation, hash) = s.split_once('-').ok_or_else(invalid)?;
        let generation: u64 = generation.parse().map_err(|_| invalid())?;
        if generation == 0 || hash.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(generation, hash))
    }
}

/// Response to a successful document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocWriteResponse {
    /// Always true.
    pub ok: bool,
    /// Document id.
    pub id: String,
    /// New revision.
    pub rev: String,
}

impl DocWriteResponse {
    pub(crate) fn new(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            ok: true,
            id: id.into(),
            rev: rev.into(),
        }
    }
}
