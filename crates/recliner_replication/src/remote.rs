//! A database behind an HTTP client.

use crate::error::{ReplicationError, ReplicationResult};
use crate::http::{HttpClient, HttpResponse, Method};
use crate::peer::Peer;
use bytes::Bytes;
use recliner_codec::{from_json_slice, from_value, to_json_vec, value, Map, Value};
use recliner_core::{
    AllDocsResponse, BulkDocResult, ChangesFilter, ChangesRequest, ChangesResponse,
    DatabaseInfo, Revisions, RevsDiff, DELETED_FIELD, ID_FIELD, REVISIONS_FIELD, REV_FIELD,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A remote database, addressed by its URL (`http://host/<db>`).
pub struct RemotePeer {
    url: String,
    headers: BTreeMap<String, String>,
    client: Arc<dyn HttpClient>,
}

impl RemotePeer {
    /// Creates a peer for `url`, sending `headers` with every request.
    pub fn new(
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self {
            url,
            headers,
            client,
        }
    }

    /// Returns the database URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ReplicationResult<HttpResponse> {
        if !self.client.is_healthy() {
            return Err(ReplicationError::transport_retryable("client is not connected"));
        }
        let body = body.map(to_json_vec).transpose()?;
        let url = format!("{}{path}", self.url);
        self.client
            .send(method, &url, &self.headers, body)
            .map_err(ReplicationError::transport_retryable)
    }

    /// Sends a JSON request; a 404 becomes `None`.
    fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ReplicationResult<Option<Value>> {
        let res = self.send(method, path, body)?;
        if res.status == 404 {
            return Ok(None);
        }
        let parsed = from_json_slice(&res.body)
            .map_err(|e| ReplicationError::Protocol(format!("invalid response from {path}: {e}")));
        if !res.is_success() {
            let message = parsed
                .ok()
                .and_then(|b| b.get("reason").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&res.body).into_owned());
            return Err(ReplicationError::Remote {
                status: res.status,
                message,
            });
        }
        parsed.map(Some)
    }

    fn require(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ReplicationResult<Value> {
        self.call(method, path, body)?.ok_or_else(|| ReplicationError::Remote {
            status: 404,
            message: format!("{}{path} not found", self.url),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(path: &str, body: &Value) -> ReplicationResult<T> {
        from_value(body)
            .map_err(|e| ReplicationError::Protocol(format!("unexpected {path} response: {e}")))
    }
}

impl Peer for RemotePeer {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn update_seq(&self) -> ReplicationResult<String> {
        let info: DatabaseInfo = Self::decode("/", &self.require(Method::Get, "", None)?)?;
        Ok(info.update_seq)
    }

    fn changes(&self, request: &ChangesRequest) -> ReplicationResult<ChangesResponse> {
        let mut body = value!({"since": request.since.clone()});
        if let Some(map) = body.as_object_mut() {
            if let Some(limit) = request.limit {
                map.insert("limit", limit);
            }
            if request.descending {
                map.insert("descending", true);
            }
            if request.include_docs {
                map.insert("include_docs", true);
            }
            match &request.filter {
                ChangesFilter::None => {}
                ChangesFilter::DocIds(ids) => {
                    map.insert("doc_ids", ids.clone());
                }
                ChangesFilter::Selector(selector) => {
                    map.insert("selector", selector.clone());
                }
            }
        }
        Self::decode("/_changes", &self.require(Method::Post, "/_changes", Some(&body))?)
    }

    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<String>>,
    ) -> ReplicationResult<BTreeMap<String, RevsDiff>> {
        let body = recliner_codec::to_value(revs)?;
        Self::decode("/_revs_diff", &self.require(Method::Post, "/_revs_diff", Some(&body))?)
    }

    fn fetch_docs(&self, ids: &[String]) -> ReplicationResult<Vec<Value>> {
        let body = value!({"keys": ids, "include_docs": true});
        let res: AllDocsResponse =
            Self::decode("/_all_docs", &self.require(Method::Post, "/_all_docs", Some(&body))?)?;
        let mut docs = Vec::with_capacity(res.rows.len());
        for row in res.rows {
            match (row.doc, row.value) {
                (Some(doc), _) => docs.push(doc),
                (None, Some(value)) if value.deleted => {
                    let mut tombstone = Map::with_capacity(3);
                    tombstone.insert(ID_FIELD, row.key);
                    tombstone.insert(REV_FIELD, value.rev);
                    tombstone.insert(DELETED_FIELD, true);
                    docs.push(Value::Object(tombstone));
                }
                _ => {}
            }
        }
        Ok(docs)
    }

    fn current_rev(&self, id: &str) -> ReplicationResult<Option<String>> {
        Ok(self
            .call(Method::Get, &format!("/{id}"), None)?
            .and_then(|doc| doc.get(REV_FIELD).and_then(Value::as_str).map(str::to_string)))
    }

    fn revisions(&self, id: &str) -> ReplicationResult<Option<Revisions>> {
        match self.call(Method::Get, &format!("/{id}?revs=true"), None)? {
            Some(doc) => match doc.get(REVISIONS_FIELD) {
                Some(revisions) => Ok(Some(Self::decode(id, revisions)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn overwrite_revisions(&self, id: &str, _revisions: Revisions) -> ReplicationResult<()> {
        Err(ReplicationError::Protocol(format!(
            "cannot overwrite the revision chain of {id} on {}",
            self.url
        )))
    }

    fn write_docs(&self, docs: Vec<Value>) -> ReplicationResult<Vec<BulkDocResult>> {
        let mut body = Map::with_capacity(2);
        body.insert("docs", Value::Array(docs));
        body.insert("new_edits", false);
        let body = Value::Object(body);
        Self::decode("/_bulk_docs", &self.require(Method::Post, "/_bulk_docs", Some(&body))?)
    }

    fn attachment(
        &self,
        doc_id: &str,
        name: &str,
        _rak: &str,
    ) -> ReplicationResult<Option<Bytes>> {
        let res = self.send(Method::Get, &format!("/{doc_id}/{name}"), None)?;
        if res.status == 404 {
            return Ok(None);
        }
        if !res.is_success() {
            return Err(ReplicationError::Remote {
                status: res.status,
                message: String::from_utf8_lossy(&res.body).into_owned(),
            });
        }
        Ok(Some(Bytes::from(res.body)))
    }

    fn store_attachment(&self, rak: &str, _data: &[u8]) -> ReplicationResult<()> {
        Err(ReplicationError::Protocol(format!(
            "attachment {rak} must be sent inline to {}",
            self.url
        )))
    }

    fn get_local(&self, id: &str) -> ReplicationResult<Option<Value>> {
        self.call(Method::Get, &format!("/_local/{id}"), None)
    }

    fn put_local(&self, id: &str, doc: Value) -> ReplicationResult<()> {
        self.call(Method::Put, &format!("/_local/{id}"), Some(&doc))
            .map(|_| ())
            .map_err(|e| ReplicationError::Checkpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::LoopbackClient;
    use crate::server::ReclinerServer;
    use recliner_core::Recliner;

    fn remote() -> (Arc<Recliner>, RemotePeer) {
        let recliner = Arc::new(Recliner::in_memory().unwrap());
        recliner.create_database("db").unwrap();
        let client = LoopbackClient::new(ReclinerServer::new(recliner.clone()));
        let peer = RemotePeer::new("http://remote/db/", BTreeMap::new(), Arc::new(client));
        (recliner, peer)
    }

    #[test]
    fn reads_through_the_server() {
        let (recliner, peer) = remote();
        let db = recliner.database("db").unwrap();
        let res = db.put("a", value!({"n": 1}), None).unwrap();
        let second = db.put("b", value!({"n": 2}), None).unwrap();
        db.delete("b", Some(&second.rev), &[]).unwrap();

        assert_eq!(peer.url(), "http://remote/db");
        assert_eq!(peer.update_seq().unwrap(), db.update_seq().unwrap());
        let page = peer.changes(&ChangesRequest::since("0").limit(10)).unwrap();
        assert_eq!(page.results.len(), 3);

        let docs = peer
            .fetch_docs(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get(DELETED_FIELD), Some(&value!(true)));

        assert_eq!(peer.current_rev("a").unwrap(), Some(res.rev.clone()));
        assert_eq!(peer.current_rev("zzz").unwrap(), None);
        let revisions = peer.revisions("a").unwrap().unwrap();
        assert_eq!(revisions.start, 1);
    }

    #[test]
    fn writes_through_the_server() {
        let (recliner, peer) = remote();
        let results = peer
            .write_docs(vec![value!({"_id": "x", "_rev": "3-abc", "v": 1})])
            .unwrap();
        assert!(results[0].ok);
        let db = recliner.database("db").unwrap();
        assert_eq!(db.current_rev("x").unwrap().as_deref(), Some("3-abc"));

        peer.put_local("cp", value!({"source_last_seq": "1"})).unwrap();
        assert!(peer.get_local("cp").unwrap().is_some());
        assert!(peer.get_local("none").unwrap().is_none());
        assert!(peer.store_attachment("k", b"x").is_err());
    }

    #[test]
    fn error_statuses_surface() {
        let recliner = Arc::new(Recliner::in_memory().unwrap());
        let client = LoopbackClient::new(ReclinerServer::new(recliner));
        let peer = RemotePeer::new("http://remote/missing", BTreeMap::new(), Arc::new(client));
        let err = peer.update_seq().unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
