//! Revision generation and per-document revision chains.

use crate::document::{Revision, ID_FIELD, REVISIONS_FIELD, REV_FIELD};
use crate::error::CoreResult;
use recliner_codec::{to_json_vec, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ancestry of a document: the current generation and hashes newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Revisions {
    /// Generation of `ids[0]`.
    pub start: u64,
    /// Revision hashes, most recent first.
    pub ids: Vec<String>,
}

impl Revisions {
    /// Returns the current revision, if any.
    pub fn current(&self) -> Option<Revision> {
        self.ids
            .first()
            .map(|hash| Revision::new(self.start, hash.clone()))
    }

    /// Returns true if `rev` appears in this ancestry.
    pub fn contains(&self, rev: &Revision) -> bool {
        let Some(offset) = self.start.checked_sub(rev.generation) else {
            return false;
        };
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.ids.get(i))
            .is_some_and(|hash| *hash == rev.hash)
    }
}

/// The stored revision chain of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionChain {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Ancestry.
    #[serde(rename = "_revisions")]
    pub revisions: Revisions,
}

impl RevisionChain {
    /// Creates an empty chain.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revisions: Revisions::default(),
        }
    }

    /// Records a new current revision by prepending its hash.
    ///
    /// `cap` bounds the number of hashes kept.
    pub fn record(&mut self, rev: &Revision, cap: Option<usize>) {
        self.revisions.start = rev.generation;
        if self.revisions.ids.first() != Some(&rev.hash) {
            self.revisions.ids.insert(0, rev.hash.clone());
        }
        if let Some(cap) = cap {
            self.revisions.ids.truncate(cap.max(1));
        }
    }

    /// Replaces the whole ancestry.
    pub fn replace(&mut self, revisions: Revisions, cap: Option<usize>) {
        self.revisions = revisions;
        if let Some(cap) = cap {
            self.revisions.ids.truncate(cap.max(1));
        }
    }
}

/// Hashes a document body, ignoring its `_rev` and `_revisions` fields.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn content_hash(doc: &Value) -> CoreResult<String> {
    let mut body = doc.clone();
    if let Some(map) = body.as_object_mut() {
        map.remove(REV_FIELD);
        map.remove(REVISIONS_FIELD);
    }
    let digest = Sha256::digest(to_json_vec(&body)?);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Computes the revision for a new local edit of `doc`.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn next_revision(prior: Option<&Revision>, doc: &Value) -> CoreResult<Revision> {
    let generation = prior.map_or(1, |r| r.generation + 1);
    Ok(Revision::new(generation, content_hash(doc)?))
}

/// Builds a chain for a replicated document from its `_revisions` field,
/// falling back to prepending its `_rev` onto the existing chain.
pub(crate) fn chain_for_replicated(
    existing: Option<RevisionChain>,
    doc: &Value,
    rev: &Revision,
    cap: Option<usize>,
) -> RevisionChain {
    let id = doc.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default();
    let mut chain = existing.unwrap_or_else(|| RevisionChain::new(id));
    let supplied = doc
        .get(REVISIONS_FIELD)
        .and_then(|v| recliner_codec::from_value::<Revisions>(v).ok())
        .filter(|r| r.current().as_ref() == Some(rev));
    match supplied {
        Some(revisions) => chain.replace(revisions, cap),
        None => chain.record(rev, cap),
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;

    #[test]
    fn hash_ignores_rev_fields() {
        let a = value!({"_id": "x", "n": 1});
        let b = value!({"_id": "x", "_rev": "1-zzz", "n": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_eq!(content_hash(&a).unwrap().len(), 64);
        let c = value!({"_id": "x", "n": 2});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());
    }

    #[test]
    fn generations_increase() {
        let doc = value!({"_id": "x"});
        let first = next_revision(None, &doc).unwrap();
        assert_eq!(first.generation, 1);
        let second = next_revision(Some(&first), &doc).unwrap();
        assert_eq!(second.generation, 2);
    }

    #[test]
    fn chain_prepends_and_caps() {
        let mut chain = RevisionChain::new("x");
        for (g, h) in [(1, "a"), (2, "b"), (3, "c")] {
            chain.record(&Revision::new(g, h), Some(2));
        }
        assert_eq!(chain.revisions.start, 3);
        assert_eq!(chain.revisions.ids, vec!["c", "b"]);
        assert!(chain.revisions.contains(&Revision::new(2, "b")));
        assert!(!chain.revisions.contains(&Revision::new(1, "a")));
    }

    #[test]
    fn replicated_chain_uses_supplied_revisions() {
        let rev = Revision::new(3, "c");
        let doc = value!({
            "_id": "x",
            "_rev": "3-c",
            "_revisions": {"start": 3, "ids": ["c", "b", "a"]}
        });
        let chain = chain_for_replicated(None, &doc, &rev, None);
        assert_eq!(chain.revisions.ids, vec!["c", "b", "a"]);

        let bare = value!({"_id": "x", "_rev": "3-c"});
        let mut existing = RevisionChain::new("x");
        existing.record(&Revision::new(1, "a"), None);
        let chain = chain_for_replicated(Some(existing), &bare, &rev, None);
        assert_eq!(chain.revisions.start, 3);
        assert_eq!(chain.revisions.ids, vec!["c", "a"]);
    }
}
