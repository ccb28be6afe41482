//! Append-only change feed.
//!
//! Every committed document write appends one [`ChangeRecord`] to the
//! `_changes` store, keyed by a per-database counter. The counter is
//! seeded from the last record on open and only advances under the
//! database commit lock, so record order equals commit order.
//!
//! Sequence strings have the form `<counter>-<random>`; only the counter
//! is significant when a sequence is parsed back.

use crate::document::is_deleted;
use crate::error::{CoreError, CoreResult};
use crate::selector::{flatten, matches};
use crate::store::DocumentStore;
use crate::stores::CHANGES;
use parking_lot::Mutex;
use recliner_codec::{from_value, to_value, Value};
use recliner_storage::{Direction, KeyRange, ScanRequest, StorageBackend};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Records read from storage per scan while filtering a feed.
const SCAN_CHUNK: usize = 256;

fn is_false(b: &bool) -> bool {
    !*b
}

/// A revision reference inside a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevEntry {
    /// Revision string.
    pub rev: String,
}

/// One persisted change-log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Auto-incrementing key; the numeric part of `seq`.
    #[serde(rename = "_id")]
    pub auto_key: u64,
    /// Changed document id.
    pub id: String,
    /// Sequence string `<auto_key>-<random>`.
    pub seq: String,
    /// Revision written.
    pub changes: Vec<RevEntry>,
    /// Whether the write was a deletion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

/// Allocates change sequence numbers for one database.
#[derive(Debug)]
pub struct ChangeFeed {
    counter: Mutex<u64>,
}

impl ChangeFeed {
    /// Seeds the counter from the last persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    pub(crate) fn open(backend: &dyn StorageBackend) -> CoreResult<Self> {
        let last = match backend.last(CHANGES)? {
            Some(raw) => from_value::<ChangeRecord>(&raw)?.auto_key,
            None => 0,
        };
        Ok(Self {
            counter: Mutex::new(last),
        })
    }

    /// Returns the number of the last allocated sequence.
    pub fn current(&self) -> u64 {
        *self.counter.lock()
    }

    /// Allocates the next record for a write of `id` at `rev`.
    ///
    /// Callers hold the database commit lock until the record is committed.
    pub(crate) fn next_record(&self, id: &str, rev: &str, deleted: bool) -> ChangeRecord {
        let mut counter = self.counter.lock();
        *counter += 1;
        ChangeRecord {
            auto_key: *counter,
            id: id.to_string(),
            seq: format!("{}-{}", *counter, Uuid::new_v4().simple()),
            changes: vec![RevEntry {
                rev: rev.to_string(),
            }],
            deleted,
        }
    }

    /// Rolls the counter back after a failed commit of `record`.
    pub(crate) fn release(&self, record: &ChangeRecord) {
        let mut counter = self.counter.lock();
        if *counter == record.auto_key {
            *counter -= 1;
        }
    }
}

impl ChangeRecord {
    pub(crate) fn to_record(&self) -> CoreResult<Value> {
        Ok(to_value(self)?)
    }
}

/// Parses the numeric part of a sequence.
///
/// An empty string is the beginning of the feed and `now` is `current`.
///
/// # Errors
///
/// Returns `BadRequest` if the sequence has no leading integer.
pub fn parse_seq(seq: &str, current: u64) -> CoreResult<u64> {
    let seq = seq.trim();
    if seq.is_empty() {
        return Ok(0);
    }
    if seq.eq_ignore_ascii_case("now") {
        return Ok(current);
    }
    seq_number(seq).ok_or_else(|| CoreError::bad_request(format!("invalid sequence: {seq}")))
}

/// Returns the numeric part of a `<n>-<random>` sequence.
pub fn seq_number(seq: &str) -> Option<u64> {
    seq.split('-').next()?.parse().ok()
}

/// Returns the sequence of the last change, or `"0"` for an empty feed.
///
/// # Errors
///
/// Returns an error if the change log cannot be read.
pub fn update_seq(backend: &dyn StorageBackend) -> CoreResult<String> {
    match backend.last(CHANGES)? {
        Some(raw) => Ok(from_value::<ChangeRecord>(&raw)?.seq),
        None => Ok("0".to_string()),
    }
}

/// Which changes a feed request returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ChangesFilter {
    /// Every change.
    #[default]
    None,
    /// Changes to the listed document ids.
    DocIds(Vec<String>),
    /// Changes whose current document matches a selector.
    Selector(Value),
}

/// A change feed request.
#[derive(Debug, Clone, Default)]
pub struct ChangesRequest {
    /// Only changes after this sequence (`"0"` or empty for all, `now`).
    pub since: String,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Newest first.
    pub descending: bool,
    /// Attach the current document body to each result.
    pub include_docs: bool,
    /// Result filter.
    pub filter: ChangesFilter,
}

impl ChangesRequest {
    /// Requests every change after `since`.
    pub fn since(since: impl Into<String>) -> Self {
        Self {
            since: since.into(),
            ..Self::default()
        }
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns newest changes first.
    #[must_use]
    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Attaches document bodies.
    #[must_use]
    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    /// Filters the feed.
    #[must_use]
    pub fn filter(mut self, filter: ChangesFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One result row of a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDoc {
    /// Document id.
    pub id: String,
    /// Sequence of the change.
    pub seq: String,
    /// Revisions written by the change.
    pub changes: Vec<RevEntry>,
    /// Whether the change was a deletion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Current document body, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// A page of the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Matching changes in feed order.
    pub results: Vec<ChangeDoc>,
    /// Where the next request should resume.
    pub last_seq: String,
}

/// Reads a page of the change feed.
///
/// Ascending feeds set `last_seq` to the last record examined, whether
/// or not the filter kept it, so a write that commits after the scan is
/// picked up by the next request. A feed that examined nothing, and a
/// descending feed that did not fill its page, return the head read
/// before scanning.
pub(crate) fn read_changes(
    backend: &dyn StorageBackend,
    feed: &ChangeFeed,
    docs: &DocumentStore,
    request: &ChangesRequest,
    default_limit: Option<usize>,
) -> CoreResult<ChangesResponse> {
    let since = parse_seq(&request.since, feed.current())?;
    let limit = request.limit.or(default_limit);
    let selector = match &request.filter {
        ChangesFilter::Selector(selector) => Some(flatten(selector)?),
        _ => None,
    };
    let direction = if request.descending {
        Direction::Prev
    } else {
        Direction::Next
    };
    let range = if since == 0 {
        KeyRange::all()
    } else {
        KeyRange::lower_bound(since, true)
    };

    let head = update_seq(backend)?;
    let mut results = Vec::new();
    let mut examined: Option<String> = None;
    let mut after: Option<Value> = None;
    'pages: while limit != Some(0) {
        let mut scan = ScanRequest::new(CHANGES)
            .range(range.clone())
            .direction(direction);
        if let Some(key) = after.take() {
            scan = scan.after(key.clone(), key);
        }
        let page = backend.collect(&scan, Some(SCAN_CHUNK))?;
        let exhausted = page.len() < SCAN_CHUNK;
        for raw in page {
            let record: ChangeRecord = from_value(&raw)?;
            after = Some(Value::from(record.auto_key));
            examined = Some(record.seq.clone());
            let keep = match &request.filter {
                ChangesFilter::None => true,
                ChangesFilter::DocIds(ids) => ids.iter().any(|id| *id == record.id),
                ChangesFilter::Selector(_) => false,
            };
            let doc = if selector.is_some() || request.include_docs {
                docs.read(&record.id)?
            } else {
                None
            };
            let keep = keep
                || match (&selector, &doc) {
                    (Some(selector), Some(doc)) => !is_deleted(doc) && matches(doc, selector),
                    _ => false,
                };
            if !keep {
                continue;
            }
            results.push(ChangeDoc {
                id: record.id,
                seq: record.seq,
                changes: record.changes,
                deleted: record.deleted,
                doc: if request.include_docs { doc } else { None },
            });
            if limit.is_some_and(|l| results.len() >= l) {
                break 'pages;
            }
        }
        if exhausted {
            break;
        }
    }

    let full = limit.is_some_and(|l| results.len() >= l);
    let last_seq = match (request.descending, examined, results.last()) {
        (false, Some(seq), _) => seq,
        (true, _, Some(last)) if full => last.seq.clone(),
        _ => head,
    };
    Ok(ChangesResponse { results, last_seq })
}
