//! Replication requests, their stable ids and topology.

use crate::error::{ReplicationError, ReplicationResult};
use recliner_codec::{to_json_vec, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

fn is_false(b: &bool) -> bool {
    !*b
}

/// One side of a replication: a URL plus headers sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// `/recliner/<db>` for a local database, `http(s)://host/<db>` otherwise.
    pub url: String,
    /// Extra request headers for a remote endpoint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Endpoint {
    /// Creates an endpoint without headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Replicate the ids listed by an external view instead of the change range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewReplication {
    /// URL answering `GET` with `{"rows": [{"id": ...}, ...]}`.
    pub remote_view_url: String,
    /// Names of `v_*` row filters installed on the target database.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub view_result_filter_functions: Vec<String>,
}

/// A replication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    /// Where documents are read.
    pub source: Endpoint,
    /// Where documents are written.
    pub target: Endpoint,
    /// Replicate only documents matching this selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
    /// Replicate only these ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    /// Stop after a page once this many documents were written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Also replicate `_design/` documents.
    #[serde(default, skip_serializing_if = "is_false")]
    pub replicate_design: bool,
    /// Leave remote attachments as stubs pointing at the source; the headers
    /// are what a later fetch of the bytes should send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lazy_headers: Option<BTreeMap<String, String>>,
    /// Take the ids to replicate from an external view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_based_replication: Option<ViewReplication>,
}

impl ReplicationRequest {
    /// Creates a request replicating everything from `source` to `target`.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: Endpoint::new(source),
            target: Endpoint::new(target),
            selector: None,
            doc_ids: None,
            limit: None,
            replicate_design: false,
            lazy_headers: None,
            view_based_replication: None,
        }
    }

    /// Parses a request body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the body does not describe a replication.
    pub fn from_value(body: &Value) -> ReplicationResult<Self> {
        recliner_codec::from_value(body)
            .map_err(|e| ReplicationError::InvalidRequest(e.to_string()))
    }

    /// Restricts the replication to documents matching `selector`.
    #[must_use]
    pub fn selector(mut self, selector: Value) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Restricts the replication to the listed ids.
    #[must_use]
    pub fn doc_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Caps the number of documents written.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Includes design documents.
    #[must_use]
    pub fn replicate_design(mut self, replicate: bool) -> Self {
        self.replicate_design = replicate;
        self
    }

    /// Leaves remote attachments unfetched.
    #[must_use]
    pub fn lazy_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.lazy_headers = Some(headers);
        self
    }

    /// Replicates the ids listed by a view.
    #[must_use]
    pub fn view_based(mut self, view: ViewReplication) -> Self {
        self.view_based_replication = Some(view);
        self
    }

    /// Returns the stable id of this request: the SHA-256 of its canonical
    /// JSON, hex encoded. Both checkpoints are stored under it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn replication_id(&self) -> ReplicationResult<String> {
        let canonical = to_json_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Which sides of a replication live in this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Both databases are local.
    LocalToLocal,
    /// Push from a local database to a remote one.
    LocalToRemote,
    /// Pull from a remote database into a local one.
    RemoteToLocal,
}

impl Topology {
    /// Classifies a replication by its endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedTopology` when neither side is local.
    pub fn classify(source: &str, target: &str, local_prefix: &str) -> ReplicationResult<Self> {
        let source_local = local_db_name(source, local_prefix).is_some();
        let target_local = local_db_name(target, local_prefix).is_some();
        match (source_local, target_local) {
            (true, true) => Ok(Topology::LocalToLocal),
            (true, false) => Ok(Topology::LocalToRemote),
            (false, true) => Ok(Topology::RemoteToLocal),
            (false, false) => Err(ReplicationError::UnsupportedTopology {
                source_url: source.to_string(),
                target_url: target.to_string(),
            }),
        }
    }
}

/// Returns the database name of a local URL (`<prefix>/<db>`).
pub fn local_db_name<'a>(url: &'a str, local_prefix: &str) -> Option<&'a str> {
    let name = url
        .strip_prefix(local_prefix)?
        .strip_prefix('/')?
        .trim_end_matches('/');
    (!name.is_empty()).then_some(name)
}
