//! Document, query and change feed commands.

use super::{open_db, CliResult};
use recliner_codec::{from_json_str, from_value, to_value, Value};
use recliner_core::{ChangesRequest, FindQuery, IndexRequest, Recliner};
use tracing::debug;

/// Writes a document from its JSON text.
pub fn put(
    recliner: &Recliner,
    db: &str,
    id: &str,
    body: &str,
    rev: Option<&str>,
) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    let doc = from_json_str(body)?;
    Ok(to_value(&db.put(id, doc, rev)?)?)
}

/// Reads a live document, `null` when there is none.
pub fn get(recliner: &Recliner, db: &str, id: &str, revs: bool) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    let doc = if revs {
        db.get_with_revisions(id)?
    } else {
        db.get(id)?
    };
    Ok(doc.unwrap_or(Value::Null))
}

/// Deletes a document, leaving a tombstone.
pub fn delete(recliner: &Recliner, db: &str, id: &str, rev: Option<&str>) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    Ok(to_value(&db.delete(id, rev, &[])?)?)
}

/// Runs a query.
///
/// The argument is either a full query object (it has a `selector` key) or
/// a bare selector.
pub fn find(recliner: &Recliner, db: &str, query: &str) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    let parsed = from_json_str(query)?;
    let query = if parsed.get("selector").is_some() {
        from_value::<FindQuery>(&parsed)?
    } else {
        FindQuery::new(parsed)
    };
    let result = db.find(&query)?;
    debug!(
        docs = result.docs.len(),
        index = ?result.execution_stats.primary_index,
        "find complete"
    );
    Ok(to_value(&result)?)
}

/// Reads one page of the change feed.
pub fn changes(
    recliner: &Recliner,
    db: &str,
    since: &str,
    limit: Option<usize>,
    include_docs: bool,
) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    let mut request = ChangesRequest::since(since).include_docs(include_docs);
    if let Some(limit) = limit {
        request = request.limit(limit);
    }
    Ok(to_value(&db.changes(&request)?)?)
}

/// Creates an index over `fields`.
pub fn create_index(
    recliner: &Recliner,
    db: &str,
    fields: &[String],
    ddoc: Option<&str>,
    name: Option<&str>,
) -> CliResult<Value> {
    let db = open_db(recliner, db)?;
    let mut request = IndexRequest::on(fields.iter().cloned());
    if let Some(ddoc) = ddoc {
        request = request.ddoc(ddoc);
    }
    if let Some(name) = name {
        request = request.name(name);
    }
    Ok(to_value(&db.create_index(&request)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CliError;
    use recliner_codec::value;

    fn recliner() -> Recliner {
        let recliner = Recliner::in_memory().unwrap();
        recliner.create_database("db").unwrap();
        recliner
    }

    #[test]
    fn put_get_delete() {
        let r = recliner();
        let written = put(&r, "db", "a", r#"{"n": 1}"#, None).unwrap();
        let rev = written.get("rev").and_then(Value::as_str).unwrap().to_string();
        assert!(rev.starts_with("1-"));

        let doc = get(&r, "db", "a", true).unwrap();
        assert_eq!(doc.get("n"), Some(&value!(1)));
        assert!(doc.get("_revisions").is_some());

        assert!(matches!(
            put(&r, "db", "a", r#"{"n": 2}"#, None),
            Err(CliError::Database(_))
        ));
        assert!(matches!(
            put(&r, "db", "b", "{not json", None),
            Err(CliError::Json(_))
        ));

        delete(&r, "db", "a", Some(&rev)).unwrap();
        assert_eq!(get(&r, "db", "a", false).unwrap(), Value::Null);
    }

    #[test]
    fn find_accepts_selector_or_query() {
        let r = recliner();
        for (id, age) in [("a", 30), ("b", 20), ("c", 40)] {
            put(&r, "db", id, &format!(r#"{{"age": {age}}}"#), None).unwrap();
        }
        create_index(&r, "db", &["age".to_string()], Some("ages"), None).unwrap();

        let bare = find(&r, "db", r#"{"age": {"$gt": 25}}"#).unwrap();
        assert_eq!(bare.get("docs").and_then(Value::as_array).unwrap().len(), 2);

        let full = find(
            &r,
            "db",
            r#"{"selector": {"age": {"$gte": 20}}, "sort": [{"age": "desc"}], "limit": 1}"#,
        )
        .unwrap();
        let docs = full.get("docs").and_then(Value::as_array).unwrap();
        assert_eq!(docs[0].get("_id"), Some(&value!("c")));
    }

    #[test]
    fn change_feed_pages() {
        let r = recliner();
        for id in ["a", "b", "c"] {
            put(&r, "db", id, "{}", None).unwrap();
        }
        let page = changes(&r, "db", "0", Some(2), false).unwrap();
        assert_eq!(page.get("results").and_then(Value::as_array).unwrap().len(), 2);
        let rest = changes(&r, "db", "2", None, true).unwrap();
        let results = rest.get("results").and_then(Value::as_array).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].get("doc").is_some());
    }
}
