//! End-to-end tests of databases through the public API.

use recliner_codec::{value, Value};
use recliner_core::{
    AllDocsRequest, Bookmark, ChangesFilter, ChangesRequest, Config, CoreError, FindQuery,
    IndexRequest, ReadOptions, Recliner,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn names(docs: &[Value]) -> Vec<&str> {
    docs.iter()
        .filter_map(|d| d.get("name").and_then(Value::as_str))
        .collect()
}

fn ids(docs: &[Value]) -> Vec<&str> {
    docs.iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_str))
        .collect()
}

#[test]
fn alice_conflict_scenario() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("people").unwrap();

    let created = db.put("alice", value!({"name": "Alice", "age": 30}), None).unwrap();
    let updated = db
        .put("alice", value!({"name": "Alice", "age": 31}), Some(&created.rev))
        .unwrap();

    let err = db
        .put("alice", value!({"name": "Alice", "age": 99}), Some(&created.rev))
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(err.error_name(), "conflict");
    assert_eq!(err.current_rev(), Some(updated.rev.as_str()));

    let retried = db
        .put("alice", value!({"name": "Alice", "age": 99}), err.current_rev())
        .unwrap();
    assert!(retried.rev.starts_with("3-"));
    assert_eq!(db.get("alice").unwrap().unwrap().get("age"), Some(&value!(99)));
}

#[test]
fn identical_content_gets_identical_revisions() {
    let recliner = Recliner::in_memory().unwrap();
    let a = recliner.create_database("a").unwrap();
    let b = recliner.create_database("b").unwrap();
    let ra = a.put("doc", value!({"x": 1, "y": [1, 2]}), None).unwrap();
    let rb = b.put("doc", value!({"x": 1, "y": [1, 2]}), None).unwrap();
    assert_eq!(ra.rev, rb.rev);
    let rc = b.put("other", value!({"x": 1, "y": [1, 2]}), None).unwrap();
    assert_ne!(ra.rev, rc.rev);
}

#[test]
fn find_uses_index_and_bounds_keys() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("people").unwrap();
    db.create_index(&IndexRequest::on(["f"])).unwrap();
    for i in 0..100 {
        db.put(&format!("d{i:03}"), value!({"f": i, "name": format!("n{i}")}), None)
            .unwrap();
    }

    let result = db
        .find(&FindQuery::new(value!({"f": {"$gte": 95}})))
        .unwrap();
    assert_eq!(result.docs.len(), 5);
    assert_eq!(result.execution_stats.primary_index.as_deref(), Some("f"));
    assert!(result.execution_stats.total_keys_examined <= 5);

    let none = db.find(&FindQuery::new(value!({"f": {"$gt": 500}}))).unwrap();
    assert!(none.docs.is_empty());
    assert_eq!(none.execution_stats.total_docs_examined, 0);
}

#[test]
fn find_sorts_and_projects() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("people").unwrap();
    for (name, age) in [("Carol", 40), ("alice", 30), ("Bob", 25)] {
        db.post(value!({"name": name, "age": age, "secret": true}))
            .unwrap();
    }

    let by_name = db
        .find(&FindQuery::new(value!({})).sort(value!(["name"])))
        .unwrap();
    assert_eq!(names(&by_name.docs), vec!["alice", "Bob", "Carol"]);

    let by_age = db
        .find(
            &FindQuery::new(value!({"age": {"$lt": 35}}))
                .sort(value!([{"age": "desc"}]))
                .fields(["name"]),
        )
        .unwrap();
    assert_eq!(names(&by_age.docs), vec!["alice", "Bob"]);
    assert!(by_age.docs.iter().all(|d| d.get("secret").is_none()));
    assert!(by_age.docs.iter().all(|d| d.get("_id").is_some()));
}

#[test]
fn bookmark_pages_through_results() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("pages").unwrap();
    db.create_index(&IndexRequest::on(["n"])).unwrap();
    for i in 0..10 {
        db.put(&format!("d{i}"), value!({"n": i}), None).unwrap();
    }

    let mut seen = Vec::new();
    let mut query = FindQuery::new(value!({"n": {"$gte": 0}})).limit(4);
    loop {
        let page = db.find(&query).unwrap();
        if page.docs.is_empty() {
            let last = Bookmark::decode(&page.bookmark).unwrap().unwrap();
            assert!(last.is_exhausted());
            break;
        }
        seen.extend(page.docs.iter().filter_map(|d| d.get("n").and_then(Value::as_u64)));
        query = query.bookmark(page.bookmark);
    }
    assert_eq!(seen, (0..10).collect::<Vec<u64>>());
}

#[test]
fn multi_probe_over_in_operator() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("colors").unwrap();
    db.create_index(&IndexRequest::on(["color"])).unwrap();
    for (id, color) in [("a", "red"), ("b", "blue"), ("c", "green"), ("d", "red")] {
        db.put(id, value!({"color": color}), None).unwrap();
    }
    let found = db
        .find(&FindQuery::new(value!({"color": {"$in": ["red", "green"]}})))
        .unwrap();
    let mut ids: Vec<_> = found
        .docs
        .iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_str))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "c", "d"]);

    let by_id = db
        .find(&FindQuery::new(value!({"_id": {"$in": ["b", "zz", "d"]}})))
        .unwrap();
    assert_eq!(by_id.docs.len(), 2);
}

fn colors(pairs: &[(&str, &str)]) -> Arc<recliner_core::Database> {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("colors").unwrap();
    db.create_index(&IndexRequest::on(["color"])).unwrap();
    for &(id, color) in pairs {
        db.put(id, value!({"color": color}), None).unwrap();
    }
    db
}

#[test]
fn in_operator_pages_with_bookmarks() {
    let db = colors(&[
        ("a", "red"),
        ("b", "red"),
        ("c", "blue"),
        ("d", "blue"),
        ("e", "red"),
        ("f", "green"),
    ]);
    let mut query = FindQuery::new(value!({"color": {"$in": ["red", "blue"]}})).limit(2);
    let mut pages = Vec::new();
    loop {
        let page = db.find(&query).unwrap();
        if page.docs.is_empty() {
            break;
        }
        assert!(page.docs.len() <= 2);
        pages.extend(ids(&page.docs).into_iter().map(str::to_string));
        query = query.bookmark(page.bookmark);
    }
    assert_eq!(pages, vec!["c", "d", "a", "b", "e"]);
}

#[test]
fn in_operator_skip_applies_after_bookmark() {
    let db = colors(&[
        ("a", "red"),
        ("b", "red"),
        ("c", "blue"),
        ("d", "blue"),
        ("e", "red"),
    ]);
    let query = FindQuery::new(value!({"color": {"$in": ["red", "blue"]}}))
        .limit(2)
        .skip(1);
    let first = db.find(&query).unwrap();
    assert_eq!(ids(&first.docs), vec!["d", "a"]);

    let second = db.find(&query.clone().bookmark(first.bookmark)).unwrap();
    assert_eq!(ids(&second.docs), vec!["e"]);
    let third = db.find(&query.bookmark(second.bookmark)).unwrap();
    assert!(third.docs.is_empty());
}

#[test]
fn in_operator_resumes_after_deleted_boundary() {
    let db = colors(&[("a", "red"), ("b", "red"), ("c", "blue"), ("d", "blue")]);
    let query = FindQuery::new(value!({"color": {"$in": ["red", "blue"]}})).limit(2);
    let first = db.find(&query).unwrap();
    assert_eq!(ids(&first.docs), vec!["c", "d"]);

    let rev = db.current_rev("d").unwrap().unwrap();
    db.delete("d", Some(&rev), &[]).unwrap();
    let second = db.find(&query.bookmark(first.bookmark)).unwrap();
    assert_eq!(ids(&second.docs), vec!["a", "b"]);
}

#[test]
fn use_index_must_exist() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("people").unwrap();
    db.create_index(&IndexRequest::on(["age"]).ddoc("people").name("by-age"))
        .unwrap();
    db.post(value!({"age": 3})).unwrap();

    assert!(db
        .find(&FindQuery::new(value!({})).use_index(value!("people/by-age")))
        .is_ok());
    let err = db
        .find(&FindQuery::new(value!({})).use_index(value!("people/nope")))
        .unwrap_err();
    assert!(matches!(err, CoreError::BadRequest { .. }));
    assert!(db
        .find(&FindQuery::new(value!({})).use_index(value!(["missing"])))
        .is_err());
}

#[test]
fn changes_filters() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("feed").unwrap();
    db.put("a", value!({"kind": "x"}), None).unwrap();
    let b = db.put("b", value!({"kind": "y"}), None).unwrap();
    db.put("c", value!({"kind": "x"}), None).unwrap();
    db.delete("b", Some(&b.rev), &[]).unwrap();

    let by_ids = db
        .changes(
            &ChangesRequest::since("0")
                .filter(ChangesFilter::DocIds(vec!["b".into(), "c".into()])),
        )
        .unwrap();
    let ids: Vec<_> = by_ids.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "b"]);

    let by_selector = db
        .changes(
            &ChangesRequest::since("0")
                .include_docs(true)
                .filter(ChangesFilter::Selector(value!({"kind": "x"}))),
        )
        .unwrap();
    assert_eq!(by_selector.results.len(), 2);
    assert!(by_selector.results.iter().all(|c| c.doc.is_some()));
    assert!(by_selector.last_seq.starts_with("4-"));

    let newest_first = db
        .changes(&ChangesRequest::since("0").descending(true).limit(1))
        .unwrap();
    assert_eq!(newest_first.results[0].id, "b");
    assert!(newest_first.results[0].deleted);

    assert!(db.changes(&ChangesRequest::since("later")).is_err());
    let now = db.changes(&ChangesRequest::since("now")).unwrap();
    assert!(now.results.is_empty());
}

#[test]
fn concurrent_writers_never_lose_updates() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("counter").unwrap();
    db.put("n", value!({"count": 0}), None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut done = 0;
                while done < 25 {
                    let doc = db.get("n").unwrap().unwrap();
                    let rev = doc.get("_rev").and_then(Value::as_str).unwrap().to_string();
                    let count = doc.get("count").and_then(Value::as_u64).unwrap();
                    match db.put("n", value!({"count": count + 1}), Some(&rev)) {
                        Ok(_) => done += 1,
                        Err(e) => assert_eq!(e.status_code(), 409),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let doc = db.get("n").unwrap().unwrap();
    assert_eq!(doc.get("count"), Some(&value!(100)));
    let feed = db.changes(&ChangesRequest::since("0")).unwrap();
    assert_eq!(feed.results.len(), 101);
    let seqs: Vec<u64> = feed
        .results
        .iter()
        .map(|c| recliner_core::seq_number(&c.seq).unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn revision_history_cap() {
    let engine = Arc::new(recliner_storage::MemoryEngine::new());
    let recliner =
        Recliner::with_engine(engine, Config::default().max_revision_history(Some(3))).unwrap();
    let db = recliner.create_database("capped").unwrap();
    let mut rev = db.put("d", value!({"v": 0}), None).unwrap().rev;
    for v in 1..10 {
        rev = db.put("d", value!({"v": v}), Some(&rev)).unwrap().rev;
    }
    let chain = db.revision_chain("d").unwrap().unwrap();
    assert_eq!(chain.start, 10);
    assert_eq!(chain.ids.len(), 3);
}

#[test]
fn file_backed_instance_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let rev = {
        let recliner = Recliner::open(dir.path(), Config::default()).unwrap();
        let db = recliner.create_database("people").unwrap();
        db.create_index(&IndexRequest::on(["age"])).unwrap();
        db.put_local("checkpoint", value!({"seq": "1"})).unwrap();
        recliner
            .put_db_design("people", &value!({"validate": [{"required": ["name"]}]}))
            .unwrap();
        let res = db.put("alice", value!({"name": "Alice", "age": 30}), None).unwrap();
        db.put_attachment("alice", "a.txt", Some(&res.rev), "text/plain", b"hi")
            .unwrap()
            .rev
    };

    let recliner = Recliner::open(dir.path(), Config::default()).unwrap();
    assert_eq!(recliner.all_databases(), vec!["people".to_string()]);
    let db = recliner.database("people").unwrap();
    assert_eq!(db.current_rev("alice").unwrap(), Some(rev));
    assert!(db.indexes().contains(&"age".to_string()));
    assert!(db.get_local("checkpoint").unwrap().is_some());
    assert!(db.post(value!({"age": 1})).is_err());
    let att = db.get_attachment("alice", "a.txt").unwrap().unwrap();
    assert_eq!(att.data.as_deref(), Some(&b"hi"[..]));
    assert_eq!(recliner.database_info("people").unwrap().doc_count, 2);
}

#[test]
fn second_open_of_same_directory_is_refused() {
    let dir = TempDir::new().unwrap();
    let _first = Recliner::open(dir.path(), Config::default()).unwrap();
    assert!(Recliner::open(dir.path(), Config::default()).is_err());
}

#[test]
fn tombstones_visible_on_request() {
    let recliner = Recliner::in_memory().unwrap();
    let db = recliner.create_database("t").unwrap();
    let res = db.put("a", value!({"v": 1}), None).unwrap();
    db.delete("a", Some(&res.rev), &[]).unwrap();
    assert!(db.get("a").unwrap().is_none());
    let tomb = db
        .open_doc("a", ReadOptions { revs: true, deleted: true })
        .unwrap()
        .unwrap();
    assert!(tomb.get("_revisions").is_some());
    let rows = db
        .all_docs(&AllDocsRequest {
            keys: Some(vec!["a".into()]),
            ..AllDocsRequest::default()
        })
        .unwrap();
    assert!(rows.rows[0].value.as_ref().unwrap().deleted);
}
