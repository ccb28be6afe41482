//! Cross-crate replication harness.
//!
//! Pairs a local instance with a second instance reachable at
//! `http://remote/<db>` through the loopback client, so every topology can
//! be exercised in one process.

use recliner_core::{AllDocsRequest, Database, Recliner};
use recliner_replication::{
    LoopbackClient, ReclinerServer, ReplicationConfig, ReplicationRequest, ReplicationResponse,
    ReplicationResult, Replicator,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Base URL the remote instance answers on.
pub const REMOTE_BASE: &str = "http://remote";

/// A local instance, a remote instance and a replicator wired to both.
pub struct ReplicationHarness {
    /// The instance the replicator runs in.
    pub local: Arc<Recliner>,
    /// The instance served over loopback HTTP.
    pub remote: Arc<Recliner>,
    /// The replicator.
    pub replicator: Replicator,
}

impl ReplicationHarness {
    /// Creates a harness with the default replication config.
    pub fn new() -> Self {
        Self::with_config(ReplicationConfig::default())
    }

    /// Creates a harness with `config`.
    pub fn with_config(config: ReplicationConfig) -> Self {
        let local = Arc::new(Recliner::in_memory().expect("Failed to open local instance"));
        let remote = Arc::new(Recliner::in_memory().expect("Failed to open remote instance"));
        let client = LoopbackClient::new(ReclinerServer::new(remote.clone()));
        let replicator = Replicator::new(local.clone(), config).with_client(Arc::new(client));
        Self {
            local,
            remote,
            replicator,
        }
    }

    /// URL of local database `db`.
    pub fn local_url(&self, db: &str) -> String {
        format!("{}/{db}", self.replicator.config().local_prefix)
    }

    /// URL of remote database `db`.
    pub fn remote_url(&self, db: &str) -> String {
        format!("{REMOTE_BASE}/{db}")
    }

    /// Runs one replication.
    pub fn replicate(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> ReplicationResult<ReplicationResponse> {
        self.replicator
            .replicate(&ReplicationRequest::new(source, target))
    }
}

impl Default for ReplicationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps every live non-design document id to its current revision.
pub fn live_revisions(db: &Database) -> BTreeMap<String, String> {
    db.all_docs(&AllDocsRequest::default())
        .expect("Failed to list documents")
        .rows
        .into_iter()
        .filter(|row| !recliner_core::is_design_id(&row.key))
        .filter_map(|row| row.value.map(|v| (row.key, v.rev)))
        .collect()
}

/// Asserts two databases hold the same live documents at the same
/// revisions.
pub fn assert_converged(a: &Database, b: &Database) {
    let (left, right) = (live_revisions(a), live_revisions(b));
    assert_eq!(
        left,
        right,
        "databases {} and {} have diverged",
        a.name(),
        b.name()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios::populate;

    #[test]
    fn push_then_pull_round_trip() {
        let h = ReplicationHarness::new();
        let a = h.local.create_database("a").unwrap();
        populate(&a, 12);
        h.remote.create_database("mid").unwrap();

        let pushed = h.replicate(h.local_url("a"), h.remote_url("mid")).unwrap();
        assert!(pushed.ok);
        let pulled = h.replicate(h.remote_url("mid"), h.local_url("b")).unwrap();
        assert!(pulled.ok);

        let mid = h.remote.database("mid").unwrap();
        let b = h.local.database("b").unwrap();
        assert_converged(&a, &mid);
        assert_converged(&a, &b);
    }

    #[test]
    fn concurrent_edits_converge_after_both_directions() {
        let h = ReplicationHarness::new();
        let a = h.local.create_database("a").unwrap();
        populate(&a, 4);
        h.replicate(h.local_url("a"), h.local_url("b")).unwrap();

        let b = h.local.database("b").unwrap();
        let rev = b.current_rev("doc0001").unwrap().unwrap();
        b.put("doc0001", recliner_codec::value!({"edited": "in b"}), Some(&rev))
            .unwrap();
        b.put("fresh", recliner_codec::value!({}), None).unwrap();

        h.replicate(h.local_url("b"), h.local_url("a")).unwrap();
        assert_converged(&a, &b);
    }
}
