//! Replication checkpoints.
//!
//! Both sides of a replication keep a local document named after the
//! replication id. It records the sessions that ran and how far each got,
//! so the next invocation can resume instead of rescanning the source.

use crate::error::{ReplicationError, ReplicationResult};
use recliner_codec::{from_value, to_value, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One page written by a replication session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Session that wrote the page.
    pub session_id: String,
    /// Source sequence the page started after.
    pub start_last_seq: String,
    /// Source sequence the page ended at.
    pub end_last_seq: String,
    /// Sequence to resume from; always `end_last_seq`.
    pub recorded_seq: String,
    /// Documents fetched from the source.
    pub docs_read: u64,
    /// Documents accepted by the target.
    pub docs_written: u64,
    /// Documents the target rejected.
    pub doc_write_failures: u64,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    /// Milliseconds since the Unix epoch.
    pub end_time: u64,
}

/// The checkpoint document stored on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Replication id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Local document revision, assigned on write.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Version of the id scheme.
    pub replication_id_version: u32,
    /// Session that last wrote this checkpoint.
    #[serde(default)]
    pub last_session_id: String,
    /// Source sequence reached by the last session.
    pub source_last_seq: String,
    /// Sessions, newest first.
    #[serde(default)]
    pub history: Vec<SessionEntry>,
}

impl Checkpoint {
    /// Creates the checkpoint of a replication that never ran.
    pub fn fresh(replication_id: impl Into<String>, version: u32) -> Self {
        Self {
            id: replication_id.into(),
            rev: None,
            replication_id_version: version,
            last_session_id: String::new(),
            source_last_seq: "0".to_string(),
            history: Vec::new(),
        }
    }

    /// Parses a stored checkpoint document.
    ///
    /// # Errors
    ///
    /// Returns `Checkpoint` if the document is not a checkpoint.
    pub fn from_value(doc: &Value) -> ReplicationResult<Self> {
        let mut checkpoint: Self =
            from_value(doc).map_err(|e| ReplicationError::Checkpoint(e.to_string()))?;
        if let Some(bare) = checkpoint.id.strip_prefix(recliner_core::LOCAL_PREFIX) {
            checkpoint.id = bare.to_string();
        }
        Ok(checkpoint)
    }

    /// Serializes the checkpoint for storage, without its revision.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> ReplicationResult<Value> {
        let mut doc = to_value(self)?;
        if let Some(map) = doc.as_object_mut() {
            map.remove("_rev");
        }
        Ok(doc)
    }

    /// Returns true if no session has written this checkpoint.
    pub fn never_synced(&self) -> bool {
        self.last_session_id.is_empty() && self.history.is_empty()
    }

    /// Prepends a session entry, keeping at most `max_history` entries.
    pub fn record(&mut self, entry: SessionEntry, max_history: usize) {
        self.last_session_id = entry.session_id.clone();
        self.source_last_seq = entry.recorded_seq.clone();
        self.history.insert(0, entry);
        self.history.truncate(max_history);
    }

    /// Decides where a replication resumes.
    ///
    /// When both sides agree on the last session (or the source never
    /// synced), the newest entry without write failures is trusted. When
    /// they disagree, the newest session both histories know about wins,
    /// at the sequence the source recorded for it.
    pub fn resume_seq(source: &Checkpoint, target: &Checkpoint) -> String {
        if source.last_session_id == target.last_session_id || source.never_synced() {
            if source.history.is_empty() {
                return source.source_last_seq.clone();
            }
            return source
                .history
                .iter()
                .find(|h| h.doc_write_failures == 0)
                .map_or_else(|| "0".to_string(), |h| h.recorded_seq.clone());
        }
        let mut recorded: HashMap<&str, &str> = HashMap::new();
        for entry in &source.history {
            recorded
                .entry(entry.session_id.as_str())
                .or_insert(entry.recorded_seq.as_str());
        }
        target
            .history
            .iter()
            .find_map(|entry| recorded.get(entry.session_id.as_str()))
            .map_or_else(|| "0".to_string(), |seq| (*seq).to_string())
    }
}

/// Outcome of one replication invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationResponse {
    /// True when every document read was written.
    pub ok: bool,
    /// Version of the id scheme.
    pub replication_id_version: u32,
    /// This invocation's session id.
    pub session_id: String,
    /// Source sequence reached.
    pub source_last_seq: String,
    /// One entry summarising the whole session.
    pub history: Vec<SessionEntry>,
}
