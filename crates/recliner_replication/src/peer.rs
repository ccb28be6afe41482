//! Replication endpoints.

use crate::error::{ReplicationError, ReplicationResult};
use bytes::Bytes;
use recliner_codec::Value;
use recliner_core::{
    BulkDocResult, ChangesRequest, ChangesResponse, Database, ReadOptions, Revisions, RevsDiff,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One side of a replication.
///
/// Implemented by [`LocalPeer`] for databases of this instance and by
/// [`RemotePeer`](crate::RemotePeer) for databases behind an HTTP client.
pub trait Peer: Send + Sync {
    /// Human-readable name for logs.
    fn describe(&self) -> String;

    /// Returns true if requests leave this process.
    fn is_remote(&self) -> bool;

    /// Returns the current change sequence.
    fn update_seq(&self) -> ReplicationResult<String>;

    /// Reads a page of the change feed.
    fn changes(&self, request: &ChangesRequest) -> ReplicationResult<ChangesResponse>;

    /// Reports which of the given revisions the peer does not hold as current.
    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<String>>,
    ) -> ReplicationResult<BTreeMap<String, RevsDiff>>;

    /// Fetches current bodies, tombstones included. Unknown ids are skipped.
    /// Bodies carry `_revisions` when the peer can supply them cheaply.
    fn fetch_docs(&self, ids: &[String]) -> ReplicationResult<Vec<Value>>;

    /// Returns the revision of a live document.
    fn current_rev(&self, id: &str) -> ReplicationResult<Option<String>>;

    /// Returns a document's revision ancestry.
    fn revisions(&self, id: &str) -> ReplicationResult<Option<Revisions>>;

    /// Replaces a document's revision ancestry.
    fn overwrite_revisions(&self, id: &str, revisions: Revisions) -> ReplicationResult<()>;

    /// Writes documents keeping their revisions (`new_edits = false`).
    fn write_docs(&self, docs: Vec<Value>) -> ReplicationResult<Vec<BulkDocResult>>;

    /// Reads the bytes of one attachment.
    fn attachment(&self, doc_id: &str, name: &str, rak: &str) -> ReplicationResult<Option<Bytes>>;

    /// Stores attachment bytes under their opaque key.
    fn store_attachment(&self, rak: &str, data: &[u8]) -> ReplicationResult<()>;

    /// Reads a local (checkpoint) document.
    fn get_local(&self, id: &str) -> ReplicationResult<Option<Value>>;

    /// Overwrites a local (checkpoint) document.
    fn put_local(&self, id: &str, doc: Value) -> ReplicationResult<()>;
}

/// A database of this instance.
pub struct LocalPeer {
    db: Arc<Database>,
}

impl LocalPeer {
    /// Wraps a database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl Peer for LocalPeer {
    fn describe(&self) -> String {
        format!("local:{}", self.db.name())
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn update_seq(&self) -> ReplicationResult<String> {
        Ok(self.db.update_seq()?)
    }

    fn changes(&self, request: &ChangesRequest) -> ReplicationResult<ChangesResponse> {
        Ok(self.db.changes(request)?)
    }

    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<String>>,
    ) -> ReplicationResult<BTreeMap<String, RevsDiff>> {
        Ok(self.db.revs_diff(revs)?)
    }

    fn fetch_docs(&self, ids: &[String]) -> ReplicationResult<Vec<Value>> {
        let options = ReadOptions {
            revs: true,
            deleted: true,
        };
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.db.open_doc(id, options)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn current_rev(&self, id: &str) -> ReplicationResult<Option<String>> {
        Ok(self.db.current_rev(id)?)
    }

    fn revisions(&self, id: &str) -> ReplicationResult<Option<Revisions>> {
        Ok(self.db.revision_chain(id)?)
    }

    fn overwrite_revisions(&self, id: &str, revisions: Revisions) -> ReplicationResult<()> {
        Ok(self.db.overwrite_revision_chain(id, revisions)?)
    }

    fn write_docs(&self, docs: Vec<Value>) -> ReplicationResult<Vec<BulkDocResult>> {
        Ok(self.db.bulk_docs(docs, false)?)
    }

    fn attachment(
        &self,
        _doc_id: &str,
        _name: &str,
        rak: &str,
    ) -> ReplicationResult<Option<Bytes>> {
        Ok(self.db.attachment_data(rak)?)
    }

    fn store_attachment(&self, rak: &str, data: &[u8]) -> ReplicationResult<()> {
        Ok(self.db.put_attachment_data(rak, data)?)
    }

    fn get_local(&self, id: &str) -> ReplicationResult<Option<Value>> {
        Ok(self.db.get_local(id)?)
    }

    fn put_local(&self, id: &str, doc: Value) -> ReplicationResult<()> {
        self.db
            .put_local(id, doc)
            .map(|_| ())
            .map_err(|e| ReplicationError::Checkpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;
    use recliner_core::Recliner;

    #[test]
    fn local_peer_reads_tombstones_with_ancestry() {
        let recliner = Recliner::in_memory().unwrap();
        let db = recliner.create_database("a").unwrap();
        let first = db.put("x", value!({"n": 1}), None).unwrap();
        db.delete("x", Some(&first.rev), &[]).unwrap();
        db.put("y", value!({"n": 2}), None).unwrap();

        let peer = LocalPeer::new(db);
        let docs = peer
            .fetch_docs(&["x".to_string(), "y".to_string(), "zz".to_string()])
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get("_deleted"), Some(&value!(true)));
        let revisions = docs[0].get("_revisions").unwrap();
        assert_eq!(revisions.get("start"), Some(&value!(2)));
        assert_eq!(peer.current_rev("x").unwrap(), None);
        assert!(!peer.is_remote());
        assert_eq!(peer.describe(), "local:a");
    }

    #[test]
    fn local_peer_checkpoints() {
        let recliner = Recliner::in_memory().unwrap();
        let peer = LocalPeer::new(recliner.create_database("a").unwrap());
        assert!(peer.get_local("rep").unwrap().is_none());
        peer.put_local("rep", value!({"source_last_seq": "3-x"})).unwrap();
        let stored = peer.get_local("rep").unwrap().unwrap();
        assert_eq!(stored.get("source_last_seq"), Some(&value!("3-x")));
    }
}
