//! `find`: query planning and execution over the document store.
//!
//! Execution picks one access path, scans it in the requested direction,
//! and re-checks every visited document against the whole selector:
//!
//! 1. A selector with a multi-probe operator (`$in`) probes once per
//!    operand value and unions the results, ordered by operand then `_id`.
//! 2. Otherwise each indexed field with a range-capable condition is
//!    probed with `count`, `$eq` fields first, then `$within`. A field
//!    with no matches ends the query; a field at or below the index
//!    threshold is taken at once; otherwise the smallest count wins.
//! 3. Without a usable index the whole store is scanned.
//!
//! A requested sort is applied to the page in memory after the scan, so
//! bookmark pages sorted on a field other than the scanned index are only
//! ordered within each page.

use crate::bookmark::Bookmark;
use crate::document::{doc_id, is_deleted, is_design_id, DESIGN_PREFIX, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::selector::{flatten, is_multi_entry, matches, Condition, FlatSelector, Operator};
use crate::stores::DOCS;
use recliner_codec::{compare, Map, SortComparator, SortDirection, Value};
use recliner_storage::{
    is_valid_key, Direction, KeyRange, ScanControl, ScanRequest, StorageBackend,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

/// A `find` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindQuery {
    /// Selector; null matches every document.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub selector: Value,
    /// Sort: `["a", {"b": "desc"}]` or `{"a": "asc"}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    /// Maximum number of documents; negative means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Matching documents to pass over before the first returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Resume after the page that returned this bookmark.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    /// Dotted paths to keep in each result (plus `_id`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// `"ddoc"`, `"ddoc/index"` or `["ddoc", "index"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_index: Option<Value>,
}

impl FindQuery {
    /// Creates a query with a selector.
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            ..Self::default()
        }
    }

    /// Sets the sort.
    #[must_use]
    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the skip offset.
    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Resumes from a bookmark.
    #[must_use]
    pub fn bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.bookmark = Some(bookmark.into());
        self
    }

    /// Projects results onto `fields`.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Names the index whose view supplies the default sort.
    #[must_use]
    pub fn use_index(mut self, index: Value) -> Self {
        self.use_index = Some(index);
        self
    }

    /// Returns the flattened selector.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed selector.
    pub fn flat_selector(&self) -> CoreResult<FlatSelector> {
        if self.selector.is_null() {
            Ok(FlatSelector::default())
        } else {
            flatten(&self.selector)
        }
    }

    /// Checks the selector, sort and index hint.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for the first malformed part.
    pub fn validate(&self) -> CoreResult<()> {
        self.flat_selector()?;
        if let Some(sort) = &self.sort {
            parse_sort(sort)?;
        }
        if let Some(index) = &self.use_index {
            parse_use_index(index)?;
        }
        Ok(())
    }
}

/// Parses a sort or index field list into `(field, direction)` pairs.
///
/// # Errors
///
/// Returns `BadRequest` for entries that are not field names or
/// single-key `{field: "asc" | "desc"}` objects.
pub fn parse_sort(sort: &Value) -> CoreResult<Vec<(String, SortDirection)>> {
    fn direction(field: &str, dir: &Value) -> CoreResult<SortDirection> {
        dir.as_str()
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| CoreError::bad_request(format!("invalid sort direction for {field}")))
    }
    match sort {
        Value::String(field) => Ok(vec![(field.clone(), SortDirection::Asc)]),
        Value::Object(fields) => fields
            .iter()
            .map(|(f, d)| Ok((f.to_string(), direction(f, d)?)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(field) => Ok((field.clone(), SortDirection::Asc)),
                Value::Object(m) if m.len() == 1 => {
                    let (f, d) = m
                        .iter()
                        .next()
                        .ok_or_else(|| CoreError::bad_request("empty sort entry"))?;
                    Ok((f.to_string(), direction(f, d)?))
                }
                _ => Err(CoreError::bad_request("invalid sort entry")),
            })
            .collect(),
        _ => Err(CoreError::bad_request("sort must be an array or object")),
    }
}

/// Splits a `use_index` hint into a design id and optional index name.
///
/// # Errors
///
/// Returns `BadRequest` if the hint is not a string or a one or two
/// element array of strings.
pub fn parse_use_index(hint: &Value) -> CoreResult<(String, Option<String>)> {
    let invalid = || {
        CoreError::bad_request("use_index must be \"ddoc\", \"ddoc/index\" or [ddoc, index]")
    };
    let design = |name: &str| {
        if name.starts_with(DESIGN_PREFIX) {
            name.to_string()
        } else {
            format!("{DESIGN_PREFIX}{name}")
        }
    };
    match hint {
        Value::String(text) => {
            let bare = text.strip_prefix(DESIGN_PREFIX).unwrap_or(text);
            match bare.split_once('/') {
                Some((ddoc, index)) => Ok((design(ddoc), Some(index.to_string()))),
                None => Ok((design(bare), None)),
            }
        }
        Value::Array(items) => match items.as_slice() {
            [Value::String(ddoc)] => Ok((design(ddoc), None)),
            [Value::String(ddoc), Value::String(index)] => {
                Ok((design(ddoc), Some(index.clone())))
            }
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

/// Counters describing how a query ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Index or primary keys visited.
    pub total_keys_examined: usize,
    /// Documents checked against the selector.
    pub total_docs_examined: usize,
    /// Wall time in milliseconds.
    pub execution_time_ms: f64,
    /// Documents returned.
    pub results_returned: usize,
    /// Field whose index narrowed the scan (`_id` for the primary key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_index: Option<String>,
}

/// Result of a `find`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResult {
    /// Matching documents.
    pub docs: Vec<Value>,
    /// Cursor for the next page.
    pub bookmark: String,
    /// How the query ran.
    pub execution_stats: ExecutionStats,
}

/// Inputs of one query execution.
pub(crate) struct FindContext<'a> {
    pub backend: &'a dyn StorageBackend,
    /// Fields with a secondary index on the document store.
    pub indexes: &'a [String],
    pub threshold: usize,
    /// Sort used when the query gives none.
    pub default_sort: Option<Vec<(String, SortDirection)>>,
}

/// A document visible to queries: live and not a design document.
pub(crate) fn is_queryable(doc: &Value) -> bool {
    !is_deleted(doc) && !doc_id(doc).is_some_and(is_design_id)
}

fn condition_value(field: &str, condition: &Condition) -> Value {
    let mut node = Map::with_capacity(1);
    node.insert(condition.op.as_str(), condition.value.clone());
    let mut out = Map::with_capacity(1);
    out.insert(field, Value::Object(node));
    Value::Object(out)
}

/// Returns the key range an index condition narrows to, if any.
fn range_for(field: &str, condition: &Condition) -> Option<KeyRange> {
    let v = &condition.value;
    if is_multi_entry(field) && condition.op != Operator::Eq {
        return None;
    }
    match condition.op {
        Operator::Lt if is_valid_key(v) => Some(KeyRange::upper_bound(v.clone(), true)),
        Operator::Lte if is_valid_key(v) => Some(KeyRange::upper_bound(v.clone(), false)),
        Operator::Eq if is_valid_key(v) => Some(KeyRange::only(v.clone())),
        Operator::Gte if is_valid_key(v) => Some(KeyRange::lower_bound(v.clone(), false)),
        Operator::Gt if is_valid_key(v) => Some(KeyRange::lower_bound(v.clone(), true)),
        Operator::Within => match v.as_array().map(Vec::as_slice) {
            Some([low, high])
                if !(low.is_array() && high.is_array())
                    && is_valid_key(low)
                    && is_valid_key(high)
                    && compare(low, high) != Ordering::Greater =>
            {
                Some(KeyRange::bound(low.clone(), high.clone(), false, false))
            }
            _ => None,
        },
        _ => None,
    }
}

fn priority(op: Operator) -> u8 {
    match op {
        Operator::Eq => 0,
        Operator::Within => 1,
        _ => 2,
    }
}

enum Planned {
    /// A probed index has no entries in range, so nothing can match.
    NoMatch(String),
    /// Scan through this condition's index, or everything when `None`.
    Scan(Option<(String, Condition)>),
}

impl FindContext<'_> {
    fn is_indexed(&self, field: &str) -> bool {
        field == ID_FIELD || self.indexes.iter().any(|i| i == field)
    }

    fn scan_request(&self, field: &str, range: KeyRange, direction: Direction) -> ScanRequest {
        let request = ScanRequest::new(DOCS).range(range).direction(direction);
        if field == ID_FIELD {
            request
        } else {
            request.index(field)
        }
    }

    fn choose(&self, selector: &FlatSelector) -> CoreResult<Planned> {
        let mut candidates: Vec<(&str, &Condition, KeyRange)> = selector
            .iter()
            .filter(|(field, _)| self.is_indexed(field))
            .filter_map(|(field, cond)| range_for(field, cond).map(|r| (field, cond, r)))
            .collect();
        candidates.sort_by_key(|(_, cond, _)| priority(cond.op));

        let mut best: Option<(usize, &str, &Condition)> = None;
        for (field, cond, range) in candidates {
            let index = (field != ID_FIELD).then_some(field);
            let count = self.backend.count(DOCS, index, &range)?;
            debug!(db = self.backend.name(), field, op = %cond.op, count, "index probe");
            if count == 0 {
                return Ok(Planned::NoMatch(field.to_string()));
            }
            if count <= self.threshold {
                best = Some((count, field, cond));
                break;
            }
            if best.map_or(true, |(c, _, _)| count < c) {
                best = Some((count, field, cond));
            }
        }
        Ok(Planned::Scan(
            best.map(|(_, field, cond)| (field.to_string(), cond.clone())),
        ))
    }

    /// Runs a query.
    pub(crate) fn execute(&self, query: &FindQuery) -> CoreResult<FindResult> {
        let started = Instant::now();
        let selector = query.flat_selector()?;
        let sort = match &query.sort {
            Some(sort) => parse_sort(sort)?,
            None => self.default_sort.clone().unwrap_or_default(),
        };
        let direction = match sort.first() {
            Some((_, SortDirection::Desc)) => Direction::Prev,
            _ => Direction::Next,
        };
        let page = PageSpec {
            limit: query.limit.and_then(|l| usize::try_from(l).ok()),
            skip: query
                .skip
                .and_then(|s| usize::try_from(s).ok())
                .unwrap_or(0),
            bookmark: match &query.bookmark {
                Some(text) => Bookmark::decode(text)?,
                None => None,
            },
        };

        let mut stats = ExecutionStats::default();
        let (mut docs, bookmark) = if page.bookmark.as_ref().is_some_and(Bookmark::is_exhausted)
            || page.limit == Some(0)
        {
            let index = page.bookmark.as_ref().and_then(|b| b.index.clone());
            (Vec::new(), Bookmark::exhausted(index))
        } else if let Some((field, cond)) = selector.multi_probe() {
            self.multi_probe(&selector, field, cond, direction, &page, &mut stats)?
        } else {
            self.single_scan(&selector, direction, &page, &mut stats)?
        };

        if !sort.is_empty() {
            let comparator = sort
                .iter()
                .fold(SortComparator::new(), |c, (f, d)| c.field(f, *d));
            comparator.sort(&mut docs);
        }
        if let Some(fields) = &query.fields {
            docs = docs.iter().map(|d| project(d, fields)).collect();
        }

        stats.results_returned = docs.len();
        stats.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            db = self.backend.name(),
            index = ?stats.primary_index,
            keys = stats.total_keys_examined,
            docs = stats.total_docs_examined,
            returned = stats.results_returned,
            "find"
        );
        Ok(FindResult {
            docs,
            bookmark: bookmark.encode()?,
            execution_stats: stats,
        })
    }

    fn single_scan(
        &self,
        selector: &FlatSelector,
        direction: Direction,
        page: &PageSpec,
        stats: &mut ExecutionStats,
    ) -> CoreResult<(Vec<Value>, Bookmark)> {
        let choice = match &page.bookmark {
            Some(bookmark) => match &bookmark.index {
                Some(index) => flatten(index)?
                    .iter()
                    .next()
                    .map(|(f, c)| (f.to_string(), c.clone())),
                None => None,
            },
            None => match self.choose(selector)? {
                Planned::NoMatch(field) => {
                    stats.primary_index = Some(field);
                    return Ok((Vec::new(), Bookmark::exhausted(None)));
                }
                Planned::Scan(choice) => choice,
            },
        };
        let index_value = choice.as_ref().map(|(f, c)| condition_value(f, c));

        let mut request = match &choice {
            Some((field, cond)) if self.is_indexed(field) => {
                let range = range_for(field, cond).unwrap_or_default();
                stats.primary_index = Some(field.clone());
                self.scan_request(field, range, direction)
            }
            Some((field, _)) => {
                return Err(CoreError::bad_request(format!(
                    "bookmark resumes on {field}, which is no longer indexed"
                )));
            }
            None => ScanRequest::new(DOCS).direction(direction),
        };
        if let Some(Bookmark {
            key,
            primary_key: Some(pk),
            ..
        }) = &page.bookmark
        {
            request = request.after(key.clone(), pk.clone());
        }

        let mut docs = Vec::new();
        let mut last = None;
        let mut skipped = 0;
        self.backend.scan(&request, &mut |entry| {
            stats.total_keys_examined += 1;
            if !is_queryable(entry.value) {
                return ScanControl::Continue;
            }
            stats.total_docs_examined += 1;
            if !matches(entry.value, selector) {
                return ScanControl::Continue;
            }
            if skipped < page.skip {
                skipped += 1;
                return ScanControl::Continue;
            }
            docs.push(entry.value.clone());
            last = Some((entry.key.clone(), entry.primary_key.clone()));
            if page.limit.is_some_and(|l| docs.len() >= l) {
                ScanControl::Stop
            } else {
                ScanControl::Continue
            }
        })?;

        let bookmark = match last {
            Some((key, pk)) => Bookmark::after(key, pk, index_value),
            None => Bookmark::exhausted(index_value),
        };
        Ok((docs, bookmark))
    }

    fn multi_probe(
        &self,
        selector: &FlatSelector,
        field: &str,
        cond: &Condition,
        direction: Direction,
        page: &PageSpec,
        stats: &mut ExecutionStats,
    ) -> CoreResult<(Vec<Value>, Bookmark)> {
        let operands = cond.value.as_array().map(Vec::as_slice).unwrap_or_default();
        let indexed = self.is_indexed(field);
        if indexed {
            stats.primary_index = Some(field.to_string());
        }

        // Candidates are ordered by (probe key, _id) so a bookmark resumes by
        // position even after the boundary document left the index.
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<(Value, String, Value)> = Vec::new();
        let mut admit = |key: &Value, doc: Value, candidates: &mut Vec<(Value, String, Value)>| {
            let Some(id) = doc_id(&doc).map(str::to_string) else {
                return;
            };
            if seen.insert(id.clone()) {
                candidates.push((key.clone(), id, doc));
            }
        };
        for operand in operands {
            if field == ID_FIELD {
                let Some(id) = operand.as_str() else { continue };
                stats.total_keys_examined += 1;
                if let Some(doc) = self.backend.get(DOCS, &Value::from(id))? {
                    admit(operand, doc, &mut candidates);
                }
            } else if indexed && is_valid_key(operand) {
                let request =
                    self.scan_request(field, KeyRange::only(operand.clone()), direction);
                for doc in self.backend.collect(&request, None)? {
                    stats.total_keys_examined += 1;
                    admit(operand, doc, &mut candidates);
                }
            } else {
                let request = ScanRequest::new(DOCS).direction(direction);
                for doc in self.backend.collect(&request, None)? {
                    stats.total_keys_examined += 1;
                    admit(&Value::Null, doc, &mut candidates);
                }
                break;
            }
        }

        let directed = |order: Ordering| match direction {
            Direction::Next => order,
            Direction::Prev => order.reverse(),
        };
        candidates.sort_by(|(ka, ia, _), (kb, ib, _)| {
            directed(compare(ka, kb).then_with(|| ia.cmp(ib)))
        });
        if let Some(Bookmark {
            key,
            primary_key: Some(pk),
            ..
        }) = &page.bookmark
        {
            let pk = pk.as_str().unwrap_or_default();
            candidates.retain(|(k, id, _)| {
                directed(compare(k, key).then_with(|| id.as_str().cmp(pk))) == Ordering::Greater
            });
        }

        let mut docs = Vec::new();
        let mut last = None;
        let mut skipped = 0;
        for (key, id, doc) in candidates {
            if !is_queryable(&doc) {
                continue;
            }
            stats.total_docs_examined += 1;
            if !matches(&doc, selector) {
                continue;
            }
            if skipped < page.skip {
                skipped += 1;
                continue;
            }
            docs.push(doc);
            last = Some((key, id));
            if page.limit.is_some_and(|l| docs.len() >= l) {
                break;
            }
        }

        let index_value = Some(condition_value(field, cond));
        let bookmark = match last {
            Some((key, id)) => Bookmark::after(key, Value::from(id), index_value),
            None => Bookmark::exhausted(index_value),
        };
        Ok((docs, bookmark))
    }
}

struct PageSpec {
    limit: Option<usize>,
    skip: usize,
    bookmark: Option<Bookmark>,
}

/// Keeps `_id` and the requested dotted paths of a document.
pub fn project(doc: &Value, fields: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    if let Some(id) = doc.get(ID_FIELD) {
        out.set_path(ID_FIELD, id.clone());
    }
    for field in fields {
        if let Some(value) = doc.get_path(field) {
            out.set_path(field, value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::initial_schema;
    use recliner_codec::value;
    use recliner_storage::MemoryBackend;

    #[test]
    fn bookmark_on_dropped_index_is_rejected() {
        let backend = MemoryBackend::new("q");
        backend.upgrade(&initial_schema()).unwrap();
        backend
            .put(DOCS, value!({"_id": "a", "_rev": "1-x", "age": 3}))
            .unwrap();
        let context = FindContext {
            backend: &backend,
            indexes: &[],
            threshold: 10,
            default_sort: None,
        };
        let index = Some(value!({"age": {"$gt": 1}}));
        let bookmark = Bookmark::after(value!(3), value!("a"), index).encode().unwrap();

        let query = FindQuery::new(value!({"age": {"$gt": 1}}));
        assert_eq!(context.execute(&query).unwrap().docs.len(), 1);
        let err = context.execute(&query.bookmark(bookmark)).unwrap_err();
        assert!(matches!(err, CoreError::BadRequest { .. }));
    }

    #[test]
    fn sort_forms() {
        assert_eq!(
            parse_sort(&value!(["name", {"age": "desc"}])).unwrap(),
            vec![
                ("name".to_string(), SortDirection::Asc),
                ("age".to_string(), SortDirection::Desc)
            ]
        );
        assert_eq!(
            parse_sort(&value!({"age": "desc"})).unwrap(),
            vec![("age".to_string(), SortDirection::Desc)]
        );
        assert!(parse_sort(&value!([{"age": "up"}])).is_err());
        assert!(parse_sort(&value!(3)).is_err());
    }

    #[test]
    fn use_index_forms() {
        assert_eq!(
            parse_use_index(&value!(["people", "by-age"])).unwrap(),
            ("_design/people".to_string(), Some("by-age".to_string()))
        );
        assert_eq!(
            parse_use_index(&value!("_design/people/by-age")).unwrap(),
            ("_design/people".to_string(), Some("by-age".to_string()))
        );
        assert_eq!(
            parse_use_index(&value!("people")).unwrap(),
            ("_design/people".to_string(), None)
        );
        assert!(parse_use_index(&value!(1)).is_err());
    }

    #[test]
    fn ranges_for_conditions() {
        let cond = |op, v| Condition::new(op, v).unwrap();
        assert_eq!(
            range_for("age", &cond(Operator::Eq, value!(3))),
            Some(KeyRange::only(3))
        );
        assert_eq!(
            range_for("age", &cond(Operator::Gt, value!(3))),
            Some(KeyRange::lower_bound(3, true))
        );
        assert_eq!(
            range_for("age", &cond(Operator::Within, value!([1, 5]))),
            Some(KeyRange::bound(1, 5, false, false))
        );
        assert_eq!(range_for("pos", &cond(Operator::Within, value!([[0, 0], [1, 1]]))), None);
        assert_eq!(range_for("age", &cond(Operator::Ne, value!(3))), None);
        assert_eq!(range_for("age", &cond(Operator::Eq, value!(null))), None);
        assert_eq!(range_for("tags_m", &cond(Operator::Gt, value!("a"))), None);
        assert!(range_for("tags_m", &cond(Operator::Eq, value!("a"))).is_some());
    }

    #[test]
    fn projection_keeps_id_and_paths() {
        let doc = value!({
            "_id": "a",
            "_rev": "1-x",
            "name": {"first": "Al", "last": "Bo"},
            "age": 3
        });
        assert_eq!(
            project(&doc, &["name.first".to_string(), "missing".to_string()]),
            value!({"_id": "a", "name": {"first": "Al"}})
        );
    }

    #[test]
    fn queryable_excludes_tombstones_and_designs() {
        assert!(is_queryable(&value!({"_id": "a"})));
        assert!(!is_queryable(&value!({"_id": "a", "_deleted": true})));
        assert!(!is_queryable(&value!({"_id": "_design/x"})));
    }

    #[test]
    fn query_serde_skips_unset_fields() {
        let q = FindQuery::new(value!({"a": 1})).limit(2);
        let v = recliner_codec::to_value(&q).unwrap();
        assert_eq!(v, value!({"selector": {"a": 1}, "limit": 2}));
        let back: FindQuery = recliner_codec::from_value(&v).unwrap();
        assert_eq!(back, q);
    }
}
