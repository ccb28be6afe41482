//! Local replication command.

use super::CliResult;
use recliner_codec::{from_json_str, to_value, Value};
use recliner_core::Recliner;
use recliner_replication::{ReplicationConfig, ReplicationRequest, Replicator};
use std::sync::Arc;
use tracing::info;

/// Optional narrowing of a replication.
#[derive(Debug, Default)]
pub struct Options {
    /// JSON selector text.
    pub selector: Option<String>,
    /// Document ids to copy.
    pub doc_ids: Vec<String>,
    /// Document write cap.
    pub limit: Option<usize>,
    /// Whether design documents are copied.
    pub design: bool,
}

/// Replicates database `source` into `target` within one data directory.
pub fn run(recliner: Recliner, source: &str, target: &str, options: Options) -> CliResult<Value> {
    let config = ReplicationConfig::default();
    let endpoint = |db: &str| format!("{}/{db}", config.local_prefix);
    let mut request = ReplicationRequest::new(endpoint(source), endpoint(target))
        .replicate_design(options.design);
    if let Some(selector) = &options.selector {
        request = request.selector(from_json_str(selector)?);
    }
    if !options.doc_ids.is_empty() {
        request = request.doc_ids(options.doc_ids);
    }
    if let Some(limit) = options.limit {
        request = request.limit(limit);
    }

    let replicator = Replicator::new(Arc::new(recliner), config);
    let response = replicator.replicate(&request)?;
    let stats = replicator.stats();
    info!(
        source,
        target,
        docs_written = stats.docs_written,
        failures = stats.doc_write_failures,
        "replication finished"
    );
    Ok(to_value(&response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;
    use recliner_core::Config;

    #[test]
    fn copies_between_databases_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let recliner = Recliner::open(dir.path(), Config::default()).unwrap();
            let db = recliner.create_database("a").unwrap();
            for i in 0..5 {
                db.put(&format!("d{i}"), value!({"i": i}), None).unwrap();
            }
            let options = Options {
                selector: Some(r#"{"i": {"$lt": 3}}"#.to_string()),
                ..Options::default()
            };
            let res = run(recliner, "a", "b", options).unwrap();
            assert_eq!(res.get("ok"), Some(&value!(true)));
        }

        let recliner = Recliner::open(dir.path(), Config::default()).unwrap();
        let b = recliner.database("b").unwrap();
        assert_eq!(b.info().unwrap().doc_count, 3);
    }
}
