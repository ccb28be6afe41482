//! HTTP-shaped handlers over a [`Recliner`] instance.
//!
//! [`ReclinerServer`] answers the requests a [`RemotePeer`](crate::RemotePeer)
//! sends, so one instance can act as the remote of another through a
//! [`LoopbackClient`](crate::LoopbackClient) or behind any HTTP front end.
//! With a [`Replicator`] attached it also serves `POST /_replicate`.

use crate::error::ReplicationError;
use crate::http::{HttpResponse, LoopbackServer, Method};
use crate::replicator::Replicator;
use crate::request::ReplicationRequest;
use bytes::Bytes;
use recliner_codec::{from_json_slice, from_value, to_json_vec, to_value, value, Map, Value};
use recliner_core::{
    AllDocsRequest, ChangesFilter, ChangesRequest, CoreError, CoreResult, Database, FindQuery,
    IndexRequest, ReadOptions, Recliner, DESIGN_PREFIX, LOCAL_PREFIX,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

enum Reply {
    Json(u16, Value),
    Bytes(Bytes),
}

impl Reply {
    fn ok(body: Value) -> CoreResult<Self> {
        Ok(Reply::Json(200, body))
    }

    fn created(body: Value) -> CoreResult<Self> {
        Ok(Reply::Json(201, body))
    }
}

/// Splits `a=1&b=2` into pairs.
fn parse_query(query: &str) -> BTreeMap<&str, &str> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect()
}

fn json_body(body: &[u8]) -> CoreResult<Value> {
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    from_json_slice(body).map_err(|e| CoreError::bad_request(format!("invalid JSON body: {e}")))
}

fn error_body(err: &CoreError) -> Value {
    let mut body = value!({"error": err.error_name(), "reason": err.to_string()});
    if let (Some(rev), Some(map)) = (err.current_rev(), body.as_object_mut()) {
        map.insert("current_rev", rev);
    }
    body
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, body: &Value) -> CoreResult<T> {
    from_value(body).map_err(|e| CoreError::bad_request(format!("invalid {what}: {e}")))
}

/// Serves one Recliner instance over HTTP-shaped requests.
pub struct ReclinerServer {
    recliner: Arc<Recliner>,
    replicator: Option<Arc<Replicator>>,
}

impl ReclinerServer {
    /// Creates a server for an instance.
    pub fn new(recliner: Arc<Recliner>) -> Self {
        Self {
            recliner,
            replicator: None,
        }
    }

    /// Serves `POST /_replicate` through `replicator`.
    #[must_use]
    pub fn with_replicator(mut self, replicator: Arc<Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    /// Returns the served instance.
    pub fn recliner(&self) -> &Arc<Recliner> {
        &self.recliner
    }

    fn replicate(&self, body: &[u8]) -> Result<Value, ReplicationError> {
        let replicator = self.replicator.as_ref().ok_or_else(|| {
            ReplicationError::InvalidRequest("this server does not run replications".into())
        })?;
        let body = json_body(body)?;
        let request = ReplicationRequest::from_value(&body)?;
        Ok(to_value(&replicator.replicate(&request)?)?)
    }

    fn database(&self, name: &str) -> CoreResult<Arc<Database>> {
        self.recliner
            .database(name)
            .ok_or_else(|| CoreError::not_found(format!("database {name}")))
    }

    fn route(&self, method: Method, path: &str, body: &[u8]) -> CoreResult<Reply> {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let query = parse_query(query);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (method, segments.as_slice()) {
            (Method::Get, []) => Reply::ok(to_value(&self.recliner.server_info())?),
            (Method::Get, ["_all_dbs"]) => Reply::ok(to_value(&self.recliner.all_databases())?),
            (Method::Get, [db]) => Reply::ok(to_value(&self.recliner.database_info(db)?)?),
            (Method::Head, [db]) => {
                self.database(db)?;
                Reply::ok(Value::Null)
            }
            (Method::Put, [db]) => {
                self.recliner.create_database(db)?;
                Reply::created(value!({"ok": true}))
            }
            (Method::Delete, [db]) => {
                self.recliner.delete_database(db)?;
                Reply::ok(value!({"ok": true}))
            }
            (Method::Post, [db]) => {
                Reply::created(to_value(&self.database(db)?.post(json_body(body)?)?)?)
            }
            (_, [db, rest @ ..]) => self.route_db(method, &*self.database(db)?, rest, &query, body),
            _ => Err(CoreError::not_found(format!("route {method} {path}"))),
        }
    }

    fn route_db(
        &self,
        method: Method,
        db: &Database,
        rest: &[&str],
        query: &BTreeMap<&str, &str>,
        body: &[u8],
    ) -> CoreResult<Reply> {
        match (method, rest) {
            (Method::Get, ["_changes"]) => {
                let mut params = Map::new();
                for (key, raw) in query {
                    let parsed = match *key {
                        "limit" => raw.parse::<u64>().map(Value::from).ok(),
                        "descending" | "include_docs" => Some(Value::Bool(*raw == "true")),
                        "since" => Some(Value::from(*raw)),
                        _ => None,
                    };
                    if let Some(parsed) = parsed {
                        params.insert(*key, parsed);
                    }
                }
                self.changes(db, &Value::Object(params))
            }
            (Method::Post, ["_changes"]) => self.changes(db, &json_body(body)?),
            (Method::Post, ["_revs_diff"]) => {
                let revs: BTreeMap<String, Vec<String>> =
                    decode("_revs_diff body", &json_body(body)?)?;
                Reply::ok(to_value(&db.revs_diff(&revs)?)?)
            }
            (Method::Post, ["_find"]) => {
                let query: FindQuery = decode("query", &json_body(body)?)?;
                Reply::ok(to_value(&db.find(&query)?)?)
            }
            (Method::Post, ["_index"]) => {
                let request: IndexRequest = decode("index request", &json_body(body)?)?;
                Reply::ok(to_value(&db.create_index(&request)?)?)
            }
            (Method::Get, ["_all_docs"]) => {
                let request = AllDocsRequest {
                    include_docs: query.get("include_docs") == Some(&"true"),
                    ..AllDocsRequest::default()
                };
                Reply::ok(to_value(&db.all_docs(&request)?)?)
            }
            (Method::Post, ["_all_docs"]) => {
                let body = json_body(body)?;
                let keys = match body.get("keys") {
                    Some(keys) => Some(decode::<Vec<String>>("keys", keys)?),
                    None => None,
                };
                let request = AllDocsRequest {
                    keys,
                    include_docs: body.get("include_docs").is_some_and(Value::is_truthy),
                    ..AllDocsRequest::default()
                };
                Reply::ok(to_value(&db.all_docs(&request)?)?)
            }
            (Method::Post, ["_bulk_docs"]) => {
                let body = json_body(body)?;
                let docs = body
                    .get("docs")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| CoreError::bad_request("_bulk_docs requires docs"))?;
                let new_edits = body.get("new_edits").and_then(Value::as_bool).unwrap_or(true);
                Reply::created(to_value(&db.bulk_docs(docs, new_edits)?)?)
            }
            (Method::Get, ["_local", id]) => match db.get_local(id)? {
                Some(doc) => Reply::ok(doc),
                None => Err(CoreError::not_found(format!("{LOCAL_PREFIX}{id}"))),
            },
            (Method::Put, ["_local", id]) => {
                Reply::created(to_value(&db.put_local(id, json_body(body)?)?)?)
            }
            (Method::Delete, ["_local", id]) => {
                db.delete_local(id)?;
                Reply::ok(value!({"ok": true}))
            }
            (_, ["_design", name, rest @ ..]) => {
                let id = format!("{DESIGN_PREFIX}{name}");
                self.route_doc(method, db, &id, rest, query, body)
            }
            (_, [id, rest @ ..]) => self.route_doc(method, db, id, rest, query, body),
            _ => Err(CoreError::not_found(format!("route {method} on {}", db.name()))),
        }
    }

    fn route_doc(
        &self,
        method: Method,
        db: &Database,
        id: &str,
        rest: &[&str],
        query: &BTreeMap<&str, &str>,
        body: &[u8],
    ) -> CoreResult<Reply> {
        match (method, rest) {
            (Method::Head, []) => {
                let rev = db
                    .current_rev(id)?
                    .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
                Reply::ok(value!({"_rev": rev}))
            }
            (Method::Get, []) => {
                let options = ReadOptions {
                    revs: query.get("revs") == Some(&"true"),
                    deleted: false,
                };
                db.open_doc(id, options)?
                    .map(|doc| Reply::Json(200, doc))
                    .ok_or_else(|| CoreError::not_found(format!("document {id}")))
            }
            (Method::Put, []) => {
                let rev = query.get("rev").copied();
                Reply::created(to_value(&db.put(id, json_body(body)?, rev)?)?)
            }
            (Method::Delete, []) => {
                let rev = query.get("rev").copied();
                Reply::ok(to_value(&db.delete(id, rev, &[])?)?)
            }
            (Method::Get, [name]) => {
                let attachment = db
                    .get_attachment(id, name)?
                    .ok_or_else(|| CoreError::not_found(format!("attachment {id}/{name}")))?;
                let data = attachment.data.ok_or_else(|| {
                    CoreError::not_found(format!("bytes of attachment {id}/{name}"))
                })?;
                Ok(Reply::Bytes(data))
            }
            _ => Err(CoreError::not_found(format!("route {method} on {id}"))),
        }
    }

    fn changes(&self, db: &Database, body: &Value) -> CoreResult<Reply> {
        let mut request = ChangesRequest::since(
            body.get("since")
                .and_then(Value::as_str)
                .unwrap_or("0")
                .to_string(),
        )
        .descending(body.get("descending").is_some_and(Value::is_truthy))
        .include_docs(body.get("include_docs").is_some_and(Value::is_truthy));
        if let Some(limit) = body.get("limit").and_then(Value::as_u64) {
            request = request.limit(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        if let Some(ids) = body.get("doc_ids") {
            let ids: Vec<String> = decode("doc_ids", ids)?;
            request = request.filter(ChangesFilter::DocIds(ids));
        } else if let Some(selector) = body.get("selector") {
            request = request.filter(ChangesFilter::Selector(selector.clone()));
        }
        Reply::ok(to_value(&db.changes(&request)?)?)
    }
}

impl LoopbackServer for ReclinerServer {
    fn handle(&self, method: Method, path: &str, body: &[u8]) -> HttpResponse {
        debug!(%method, path, "handling request");
        if method == Method::Post && path.trim_end_matches('/') == "/_replicate" {
            let (status, body) = match self.replicate(body) {
                Ok(body) => (200, body),
                Err(e) => (
                    e.status_code(),
                    value!({"error": "replication_failed", "reason": e.to_string()}),
                ),
            };
            return match to_json_vec(&body) {
                Ok(bytes) => HttpResponse::new(status, bytes),
                Err(e) => HttpResponse::new(500, e.to_string().into_bytes()),
            };
        }
        let reply = self.route(method, path, body);
        if method == Method::Head {
            let status = match reply {
                Ok(Reply::Json(status, _)) => status,
                Ok(Reply::Bytes(_)) => 200,
                Err(e) => e.status_code(),
            };
            return HttpResponse::new(status, Vec::new());
        }
        let (status, body) = match reply {
            Ok(Reply::Bytes(data)) => return HttpResponse::new(200, data.to_vec()),
            Ok(Reply::Json(status, body)) => (status, body),
            Err(e) => (e.status_code(), error_body(&e)),
        };
        match to_json_vec(&body) {
            Ok(bytes) => HttpResponse::new(status, bytes),
            Err(e) => HttpResponse::new(500, e.to_string().into_bytes()),
        }
    }
}
