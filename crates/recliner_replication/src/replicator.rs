//! The replication loop.

use crate::checkpoint::{Checkpoint, ReplicationResponse, SessionEntry};
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::http::{HttpClient, Method};
use crate::peer::{LocalPeer, Peer};
use crate::remote::RemotePeer;
use crate::request::{local_db_name, Endpoint, ReplicationRequest, Topology, ViewReplication};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use recliner_codec::{from_json_slice, from_value, to_value, Map, Value};
use recliner_core::{
    attachment_infos, doc_id, doc_rev, is_deleted, is_design_id, seq_number, ChangesFilter,
    ChangesRequest, ChangesResponse, CoreError, Recliner, Revisions, ATTACHMENTS_FIELD,
    REVISIONS_FIELD,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Field holding data that must never leave the local database.
const LOCAL_ONLY_FIELD: &str = "_local";

/// Cumulative statistics of a replicator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Invocations that ran to completion.
    pub sessions_completed: u64,
    /// Documents fetched from sources.
    pub docs_read: u64,
    /// Documents accepted by targets.
    pub docs_written: u64,
    /// Documents targets rejected.
    pub doc_write_failures: u64,
    /// Session id of the last completed invocation.
    pub last_session_id: Option<String>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Counts of one page, or of a whole session.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    read: u64,
    written: u64,
    failed: u64,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.read += other.read;
        self.written += other.written;
        self.failed += other.failed;
    }
}

/// An attachment whose bytes follow its document to a local target.
struct PendingBytes {
    doc_id: String,
    name: String,
    rak: String,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Returns true once `start` has caught up with `end`.
fn reached(start: &str, end: &str) -> bool {
    match (seq_number(start), seq_number(end)) {
        (Some(start), Some(end)) => start >= end,
        _ => start == end,
    }
}

fn load_checkpoint(peer: &dyn Peer, id: &str, version: u32) -> ReplicationResult<Checkpoint> {
    match peer.get_local(id)? {
        Some(doc) => {
            let checkpoint = Checkpoint::from_value(&doc)?;
            if checkpoint.replication_id_version == version {
                Ok(checkpoint)
            } else {
                Ok(Checkpoint::fresh(id, version))
            }
        }
        None => Ok(Checkpoint::fresh(id, version)),
    }
}

/// Replicates documents between databases.
///
/// Each call to [`Replicator::replicate`] is one bounded session: it
/// resumes from the checkpoints both sides hold, copies every change up
/// to the source's current sequence page by page, and checkpoints after
/// each page. A failed page aborts the session; the next call resumes
/// from the last checkpoint.
///
/// ```
/// use recliner_codec::value;
/// use recliner_core::Recliner;
/// use recliner_replication::{ReplicationConfig, ReplicationRequest, Replicator};
/// use std::sync::Arc;
///
/// let recliner = Arc::new(Recliner::in_memory().unwrap());
/// let db = recliner.create_database("a").unwrap();
/// db.post(value!({"n": 1})).unwrap();
///
/// let replicator = Replicator::new(recliner.clone(), ReplicationConfig::default());
/// let res = replicator
///     .replicate(&ReplicationRequest::new("/recliner/a", "/recliner/b"))
///     .unwrap();
/// assert!(res.ok);
/// assert_eq!(res.history[0].docs_written, 1);
/// assert_eq!(recliner.database_info("b").unwrap().doc_count, 1);
/// ```
pub struct Replicator {
    recliner: Arc<Recliner>,
    client: Option<Arc<dyn HttpClient>>,
    config: ReplicationConfig,
    stats: RwLock<ReplicationStats>,
    sessions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Replicator {
    /// Creates a replicator for local databases only.
    pub fn new(recliner: Arc<Recliner>, config: ReplicationConfig) -> Self {
        Self {
            recliner,
            client: None,
            config,
            stats: RwLock::new(ReplicationStats::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Adds an HTTP client for remote endpoints.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    /// Runs one replication session.
    ///
    /// # Errors
    ///
    /// - `UnsupportedTopology` when neither endpoint is local
    /// - `Database` with `NotFound` for an unknown local source
    /// - any transport, remote or storage failure of a page
    pub fn replicate(
        &self,
        request: &ReplicationRequest,
    ) -> ReplicationResult<ReplicationResponse> {
        match self.run(request) {
            Ok((response, tally)) => {
                let mut stats = self.stats.write();
                stats.sessions_completed += 1;
                stats.docs_read += tally.read;
                stats.docs_written += tally.written;
                stats.doc_write_failures += tally.failed;
                stats.last_session_id = Some(response.session_id.clone());
                Ok(response)
            }
            Err(e) => {
                warn!(
                    source = %request.source.url,
                    target = %request.target.url,
                    error = %e,
                    "replication failed"
                );
                self.stats.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn session_lock(&self, replication_id: &str) -> Arc<Mutex<()>> {
        self.sessions
            .lock()
            .entry(replication_id.to_string())
            .or_default()
            .clone()
    }

    fn open_peer(&self, endpoint: &Endpoint, is_target: bool) -> ReplicationResult<Box<dyn Peer>> {
        if let Some(name) = local_db_name(&endpoint.url, &self.config.local_prefix) {
            let db = if is_target {
                self.recliner.ensure_database(name)?
            } else {
                self.recliner
                    .database(name)
                    .ok_or_else(|| CoreError::not_found(format!("database {name}")))?
            };
            return Ok(Box::new(LocalPeer::new(db)));
        }
        let client = self.remote_client(&endpoint.url)?;
        Ok(Box::new(RemotePeer::new(
            endpoint.url.clone(),
            endpoint.headers.clone(),
            client,
        )))
    }

    fn remote_client(&self, url: &str) -> ReplicationResult<Arc<dyn HttpClient>> {
        self.client
            .clone()
            .ok_or_else(|| ReplicationError::transport_fatal(format!("no HTTP client for {url}")))
    }

    fn run(
        &self,
        request: &ReplicationRequest,
    ) -> ReplicationResult<(ReplicationResponse, Tally)> {
        let topology = Topology::classify(
            &request.source.url,
            &request.target.url,
            &self.config.local_prefix,
        )?;
        let replication_id = request.replication_id()?;
        let lock = self.session_lock(&replication_id);
        let _session = lock.lock();

        let source = self.open_peer(&request.source, false)?;
        let target = self.open_peer(&request.target, true)?;
        let version = self.config.replication_id_version;
        let session_id = Uuid::new_v4().simple().to_string();
        let session_start = now_millis();

        let mut log = load_checkpoint(source.as_ref(), &replication_id, version)?;
        let target_log = load_checkpoint(target.as_ref(), &replication_id, version)?;
        let first_seq = Checkpoint::resume_seq(&log, &target_log);
        let filter = self.change_filter(request)?;
        let end_seq = match filter {
            ChangesFilter::None => source.update_seq()?,
            _ => {
                source
                    .changes(&ChangesRequest::since(first_seq.clone()).filter(filter.clone()))?
                    .last_seq
            }
        };
        info!(
            %replication_id,
            %session_id,
            ?topology,
            source = %source.describe(),
            target = %target.describe(),
            start_seq = %first_seq,
            %end_seq,
            "replication started"
        );

        let mut start_seq = first_seq.clone();
        let mut total = Tally::default();
        while !reached(&start_seq, &end_seq) {
            let page_start = now_millis();
            let page = source.changes(
                &ChangesRequest::since(start_seq.clone())
                    .limit(self.config.bulk_doc_limit)
                    .filter(filter.clone()),
            )?;
            if page.results.is_empty() {
                start_seq = end_seq.clone();
                break;
            }
            let tally = self.replicate_page(request, source.as_ref(), target.as_ref(), &page)?;
            total.add(tally);

            log.record(
                SessionEntry {
                    session_id: session_id.clone(),
                    start_last_seq: start_seq.clone(),
                    end_last_seq: page.last_seq.clone(),
                    recorded_seq: page.last_seq.clone(),
                    docs_read: tally.read,
                    docs_written: tally.written,
                    doc_write_failures: tally.failed,
                    start_time: page_start,
                    end_time: now_millis(),
                },
                self.config.max_history,
            );
            let stored = log.to_value()?;
            source.put_local(&replication_id, stored.clone())?;
            target.put_local(&replication_id, stored)?;
            debug!(%session_id, seq = %page.last_seq, written = tally.written, "checkpoint saved");

            start_seq = page.last_seq;
            if request
                .limit
                .is_some_and(|limit| total.written >= limit as u64)
            {
                break;
            }
        }

        info!(
            %session_id,
            docs_read = total.read,
            docs_written = total.written,
            doc_write_failures = total.failed,
            "replication finished"
        );
        let summary = SessionEntry {
            session_id: session_id.clone(),
            start_last_seq: first_seq,
            end_last_seq: start_seq.clone(),
            recorded_seq: start_seq.clone(),
            docs_read: total.read,
            docs_written: total.written,
            doc_write_failures: total.failed,
            start_time: session_start,
            end_time: now_millis(),
        };
        let response = ReplicationResponse {
            ok: total.read == total.written,
            replication_id_version: version,
            session_id,
            source_last_seq: start_seq,
            history: vec![summary],
        };
        Ok((response, total))
    }

    /// Picks how changes are selected: ids, then selector, then an
    /// external view, then the plain sequence range.
    fn change_filter(&self, request: &ReplicationRequest) -> ReplicationResult<ChangesFilter> {
        if let Some(ids) = &request.doc_ids {
            return Ok(ChangesFilter::DocIds(ids.clone()));
        }
        if let Some(selector) = &request.selector {
            return Ok(ChangesFilter::Selector(selector.clone()));
        }
        if let Some(view) = &request.view_based_replication {
            return Ok(ChangesFilter::DocIds(self.view_ids(request, view)?));
        }
        Ok(ChangesFilter::None)
    }

    fn view_ids(
        &self,
        request: &ReplicationRequest,
        view: &ViewReplication,
    ) -> ReplicationResult<Vec<String>> {
        let client = self.remote_client(&view.remote_view_url)?;
        let res = client
            .send(
                Method::Get,
                &view.remote_view_url,
                &request.source.headers,
                None,
            )
            .map_err(ReplicationError::transport_retryable)?;
        if !res.is_success() {
            return Err(ReplicationError::Remote {
                status: res.status,
                message: String::from_utf8_lossy(&res.body).into_owned(),
            });
        }
        let body = from_json_slice(&res.body)
            .map_err(|e| ReplicationError::Protocol(format!("invalid view response: {e}")))?;
        let mut rows = body
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ReplicationError::Protocol("view response has no rows".into()))?;
        if !view.view_result_filter_functions.is_empty() {
            let db = local_db_name(&request.target.url, &self.config.local_prefix)
                .and_then(|name| self.recliner.database(name))
                .ok_or_else(|| {
                    ReplicationError::InvalidRequest(
                        "view filters need a local target database".into(),
                    )
                })?;
            rows = db.filter_view_rows(&view.view_result_filter_functions, rows)?;
        }
        Ok(rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn replicate_page(
        &self,
        request: &ReplicationRequest,
        source: &dyn Peer,
        target: &dyn Peer,
        page: &ChangesResponse,
    ) -> ReplicationResult<Tally> {
        let mut latest: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for change in &page.results {
            if !request.replicate_design && is_design_id(&change.id) {
                continue;
            }
            if let Some(entry) = change.changes.first() {
                latest.insert(change.id.clone(), vec![entry.rev.clone()]);
            }
        }
        if latest.is_empty() {
            return Ok(Tally::default());
        }
        let ids: Vec<String> = target.revs_diff(&latest)?.into_keys().collect();
        if ids.is_empty() {
            return Ok(Tally::default());
        }

        let mut docs = source.fetch_docs(&ids)?;
        docs.retain(|doc| request.replicate_design || !doc_id(doc).is_some_and(is_design_id));
        let mut pending = Vec::new();
        for doc in &mut docs {
            if !target.is_remote() {
                Self::resolve_conflict(source, target, doc)?;
            }
            self.route_attachments(request, source, target, doc, &mut pending)?;
            if target.is_remote() {
                if let Some(map) = doc.as_object_mut() {
                    map.remove(LOCAL_ONLY_FIELD);
                }
            }
        }

        let mut tally = Tally {
            read: docs.len() as u64,
            ..Tally::default()
        };
        let results = target.write_docs(docs)?;
        let mut written = Vec::with_capacity(results.len());
        for result in results {
            if result.ok {
                tally.written += 1;
                written.push(result.id);
            } else {
                tally.failed += 1;
                warn!(
                    id = %result.id,
                    error = result.error.as_deref().unwrap_or_default(),
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "document not replicated"
                );
            }
        }

        for item in pending.iter().filter(|p| written.contains(&p.doc_id)) {
            match source.attachment(&item.doc_id, &item.name, &item.rak)? {
                Some(data) => target.store_attachment(&item.rak, &data)?,
                None => warn!(
                    id = %item.doc_id,
                    name = %item.name,
                    "attachment bytes missing at source"
                ),
            }
        }
        Ok(tally)
    }

    /// Aligns the target's revision chain with the source's before a
    /// document replaces a different live revision.
    fn resolve_conflict(
        source: &dyn Peer,
        target: &dyn Peer,
        doc: &mut Value,
    ) -> ReplicationResult<()> {
        let Some(id) = doc_id(doc).map(str::to_string) else {
            return Ok(());
        };
        let Some(current) = target.current_rev(&id)? else {
            return Ok(());
        };
        if doc_rev(doc) == Some(current.as_str()) {
            return Ok(());
        }
        let supplied = doc
            .get(REVISIONS_FIELD)
            .and_then(|v| from_value::<Revisions>(v).ok());
        let revisions = match supplied {
            Some(revisions) => Some(revisions),
            None if is_deleted(doc) => None,
            None => source.revisions(&id)?,
        };
        if let Some(revisions) = revisions {
            debug!(%id, %current, "overwriting revision chain");
            if let Some(map) = doc.as_object_mut() {
                map.insert(REVISIONS_FIELD, to_value(&revisions)?);
            }
            target.overwrite_revisions(&id, revisions)?;
        }
        Ok(())
    }

    /// Decides how each attachment travels: inline to a remote target,
    /// as a lazy stub, or as bytes copied after the document is written.
    fn route_attachments(
        &self,
        request: &ReplicationRequest,
        source: &dyn Peer,
        target: &dyn Peer,
        doc: &mut Value,
        pending: &mut Vec<PendingBytes>,
    ) -> ReplicationResult<()> {
        let Some(id) = doc_id(doc).map(str::to_string) else {
            return Ok(());
        };
        for (name, info) in attachment_infos(doc) {
            if info.cloud_url.is_some() {
                continue;
            }
            if target.is_remote() {
                let Some(data) = source.attachment(&id, &name, &info.rak)? else {
                    continue;
                };
                if let Some(entry) = attachment_entry(doc, &name) {
                    entry.insert("data", STANDARD.encode(&data));
                }
            } else if source.is_remote() && request.lazy_headers.is_some() {
                let url = format!("{}/{id}/{name}", request.source.url.trim_end_matches('/'));
                if let Some(entry) = attachment_entry(doc, &name) {
                    entry.insert("cloud_url", url);
                }
            } else {
                pending.push(PendingBytes {
                    doc_id: id.clone(),
                    name,
                    rak: info.rak,
                });
            }
        }
        Ok(())
    }
}

fn attachment_entry<'a>(doc: &'a mut Value, name: &str) -> Option<&'a mut Map> {
    doc.as_object_mut()?
        .get_mut(ATTACHMENTS_FIELD)?
        .as_object_mut()?
        .get_mut(name)?
        .as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;

    fn setup() -> (Arc<Recliner>, Replicator) {
        let recliner = Arc::new(Recliner::in_memory().unwrap());
        let replicator = Replicator::new(recliner.clone(), ReplicationConfig::default());
        (recliner, replicator)
    }

    #[test]
    fn sequences_reach_their_end() {
        assert!(reached("0", "0"));
        assert!(reached("5-a", "5-b"));
        assert!(reached("6-a", "5-b"));
        assert!(!reached("4-a", "5-b"));
        assert!(!reached("0", "1-x"));
    }

    #[test]
    fn copies_and_checkpoints() {
        let (recliner, replicator) = setup();
        let a = recliner.create_database("a").unwrap();
        for i in 0..3 {
            a.put(&format!("d{i}"), value!({"i": i}), None).unwrap();
        }
        let request = ReplicationRequest::new("/recliner/a", "/recliner/b");
        let res = replicator.replicate(&request).unwrap();
        assert!(res.ok);
        assert_eq!(res.history[0].docs_read, 3);
        assert_eq!(res.source_last_seq, a.update_seq().unwrap());

        let id = request.replication_id().unwrap();
        let b = recliner.database("b").unwrap();
        let source_log = Checkpoint::from_value(&a.get_local(&id).unwrap().unwrap()).unwrap();
        let target_log = Checkpoint::from_value(&b.get_local(&id).unwrap().unwrap()).unwrap();
        assert_eq!(source_log.last_session_id, res.session_id);
        assert_eq!(source_log.history, target_log.history);
        assert_eq!(source_log.history[0].recorded_seq, res.source_last_seq);

        let stats = replicator.stats();
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.docs_written, 3);
    }

    #[test]
    fn unknown_source_and_remote_without_client() {
        let (_recliner, replicator) = setup();
        let err = replicator
            .replicate(&ReplicationRequest::new("/recliner/none", "/recliner/b"))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(replicator.stats().last_error.is_some());

        let err = replicator
            .replicate(&ReplicationRequest::new("http://remote/a", "/recliner/b"))
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { retryable: false, .. }));

        let err = replicator
            .replicate(&ReplicationRequest::new("http://x/a", "http://y/b"))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn write_cap_stops_after_a_page() {
        let recliner = Arc::new(Recliner::in_memory().unwrap());
        let replicator = Replicator::new(
            recliner.clone(),
            ReplicationConfig::default().with_bulk_doc_limit(2),
        );
        let a = recliner.create_database("a").unwrap();
        for i in 0..6 {
            a.put(&format!("d{i}"), value!({"i": i}), None).unwrap();
        }
        let request = ReplicationRequest::new("/recliner/a", "/recliner/b").limit(3);
        let res = replicator.replicate(&request).unwrap();
        assert_eq!(res.history[0].docs_written, 4);
        assert_eq!(recliner.database_info("b").unwrap().doc_count, 4);

        let rest = replicator.replicate(&request).unwrap();
        assert_eq!(rest.history[0].docs_written, 2);
        assert_eq!(recliner.database_info("b").unwrap().doc_count, 6);
    }
}
