//! Design documents, index definitions and the declarative extension bundle.
//!
//! A design document installed through [`crate::Database::put_design`]
//! declares query indexes in `views`:
//!
//! ```json
//! {
//!   "_id": "_design/people",
//!   "language": "query",
//!   "views": {
//!     "by-age": {
//!       "map": {"fields": {"age": "desc"}},
//!       "options": {"def": {"fields": [{"age": "desc"}]}}
//!     }
//!   }
//! }
//! ```
//!
//! Every field named in a view becomes a secondary index on the document
//! store. Fields ending in `_m` are indexed per array element.
//!
//! A database may also carry one [`DbDesign`]: validation rules, update
//! functions (`u_*`), named queries (`m_*`), reducers (`r_*`) and view row
//! filters (`v_*`). These are declarative; nothing user-supplied is
//! executed.

use crate::document::{DESIGN_PREFIX, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::query::{parse_sort, FindQuery};
use crate::selector::{flatten, matches};
use recliner_codec::{compare_opt, from_value, to_value, Map, SortDirection, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Language tag of index-only design documents.
pub const QUERY_LANGUAGE: &str = "query";

/// Prefix of update function names.
pub const UPDATE_PREFIX: &str = "u_";
/// Prefix of named query names.
pub const QUERY_PREFIX: &str = "m_";
/// Prefix of reducer names.
pub const REDUCER_PREFIX: &str = "r_";
/// Prefix of view row filter names.
pub const VIEW_FILTER_PREFIX: &str = "v_";

/// Returns `name` as a design document id.
pub fn design_id(name: &str) -> String {
    if name.starts_with(DESIGN_PREFIX) {
        name.to_string()
    } else {
        format!("{DESIGN_PREFIX}{name}")
    }
}

/// Index definition of an index request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Indexed fields: names, or `{name: direction}` objects.
    pub fields: Vec<Value>,
    /// Optional sort overriding the directions of `fields`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
}

/// Body of an index creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    /// Design document to hold the index; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddoc: Option<String>,
    /// Index (view) name; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The index definition.
    pub index: IndexDefinition,
}

impl IndexRequest {
    /// Requests an ascending index on `fields`.
    pub fn on<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ddoc: None,
            name: None,
            index: IndexDefinition {
                fields: fields.into_iter().map(|f| Value::from(f.into())).collect(),
                sort: None,
            },
        }
    }

    /// Sets the design document name.
    #[must_use]
    pub fn ddoc(mut self, ddoc: impl Into<String>) -> Self {
        self.ddoc = Some(ddoc.into());
        self
    }

    /// Sets the index name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the design document this request installs, and the view name.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if no field is given or a field entry is
    /// malformed.
    pub fn to_design(&self) -> CoreResult<(Value, String)> {
        if self.index.fields.is_empty() {
            return Err(CoreError::bad_request("index requires at least one field"));
        }
        let mut fields = parse_sort(&Value::Array(self.index.fields.clone()))?;
        if let Some(sort) = &self.index.sort {
            for (field, direction) in parse_sort(sort)? {
                if let Some(entry) = fields.iter_mut().find(|(f, _)| *f == field) {
                    entry.1 = direction;
                }
            }
        }
        let name = match &self.name {
            Some(name) => name.clone(),
            None => {
                let digest = Sha256::digest(recliner_codec::to_json_vec(&self.index.fields)?);
                let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
                format!("idx-{hex}")
            }
        };
        let id = design_id(self.ddoc.as_deref().unwrap_or(&name));

        let mut map_fields = Map::new();
        for (field, direction) in &fields {
            map_fields.insert(field.clone(), direction.to_string());
        }
        let mut view = Value::Object(Map::new());
        view.set_path("map.fields", Value::Object(map_fields));
        view.set_path("options.def.fields", Value::Array(self.index.fields.clone()));

        let mut views = Map::new();
        views.insert(name.clone(), view);
        let mut design = Map::new();
        design.insert(ID_FIELD, id);
        design.insert("language", QUERY_LANGUAGE);
        design.insert("views", Value::Object(views));
        Ok((Value::Object(design), name))
    }
}

/// Outcome of an index creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResponse {
    /// `created` or `exists`.
    pub result: String,
    /// Design document id.
    pub id: String,
    /// Index name.
    pub name: String,
}

fn field_name(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(s) => Some(s),
        Value::Object(m) if m.len() == 1 => m.keys().next(),
        _ => None,
    }
}

/// Returns every field a design document indexes, in declaration order.
pub fn indexed_fields(design: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let Some(views) = design.get("views").and_then(Value::as_object) else {
        return out;
    };
    for view in views.values() {
        let declared = view
            .get_path("options.def.fields")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(field_name).map(str::to_string).collect())
            .unwrap_or_else(|| {
                view.get_path("map.fields")
                    .and_then(Value::as_object)
                    .map(|m| m.keys().map(str::to_string).collect::<Vec<_>>())
                    .unwrap_or_default()
            });
        for field in declared {
            if !out.contains(&field) {
                out.push(field);
            }
        }
    }
    out
}

/// Returns true if the design document declares `view`.
pub fn has_view(design: &Value, view: &str) -> bool {
    design
        .get("views")
        .and_then(|v| v.get(view))
        .is_some()
}

/// Returns the sort a view declares through `map.fields`.
pub fn view_sort(design: &Value, view: &str) -> Option<Vec<(String, SortDirection)>> {
    let fields = design
        .get("views")?
        .get(view)?
        .get_path("map.fields")?
        .as_object()?;
    Some(
        fields
            .iter()
            .map(|(field, dir)| {
                let direction = dir
                    .as_str()
                    .and_then(|d| d.parse().ok())
                    .unwrap_or_default();
                (field.to_string(), direction)
            })
            .collect(),
    )
}

/// A declarative write validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// Fields every written document must have.
    Required(Vec<String>),
    /// A selector every written document must match.
    Selector(Value),
    /// Fields that cannot change once written.
    Immutable(Vec<String>),
    /// Reject deletions.
    ForbidDelete(bool),
}

/// A declarative update function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateFunction {
    /// Dotted paths to set.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map,
    /// Dotted paths to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
    /// Dotted paths to increment by a number.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub increment: Map,
}

impl UpdateFunction {
    /// Applies the update to a document body.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if an increment targets a non-number or a path
    /// cannot be created.
    pub fn apply(&self, mut doc: Value) -> CoreResult<Value> {
        for (path, value) in self.set.iter() {
            if !doc.set_path(path, value.clone()) {
                return Err(CoreError::bad_request(format!("cannot set {path}")));
            }
        }
        for path in &self.unset {
            doc.remove_path(path);
        }
        for (path, by) in self.increment.iter() {
            let by = by
                .as_f64()
                .ok_or_else(|| {
                    CoreError::bad_request(format!("increment of {path} is not a number"))
                })?;
            let current = match doc.get_path(path) {
                None | Some(Value::Null) => 0.0,
                Some(Value::Number(n)) => *n,
                Some(other) => {
                    return Err(CoreError::bad_request(format!(
                        "cannot increment {path}: it is a {}",
                        other.type_name()
                    )))
                }
            };
            if !doc.set_path(path, Value::Number(current + by)) {
                return Err(CoreError::bad_request(format!("cannot set {path}")));
            }
        }
        Ok(doc)
    }
}

/// A reducer over the documents of a named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Number of documents.
    Count,
    /// Sum of a numeric field; other values are skipped.
    Sum(String),
}

impl Reducer {
    /// Reduces documents to one value.
    pub fn reduce(&self, docs: &[Value]) -> Value {
        match self {
            Reducer::Count => Value::from(docs.len()),
            Reducer::Sum(field) => Value::Number(
                docs.iter()
                    .filter_map(|d| d.get_path(field).and_then(Value::as_f64))
                    .sum(),
            ),
        }
    }
}

/// The extension bundle installed on one database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbDesign {
    /// Validation rules, all of which must pass.
    pub validate: Vec<ValidationRule>,
    /// Update functions by name (`u_*`).
    pub updates: BTreeMap<String, UpdateFunction>,
    /// Stored queries by name (`m_*`).
    pub queries: BTreeMap<String, FindQuery>,
    /// Reducers by name (`r_*`).
    pub reducers: BTreeMap<String, Reducer>,
    /// View row filters by name (`v_*`): selectors over `{id, key, value}`.
    pub view_filters: BTreeMap<String, Value>,
}

impl DbDesign {
    /// Parses a bundle, checking every entry name and definition.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for unknown entry names or malformed entries.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::bad_request("database design must be an object"))?;
        let mut design = DbDesign::default();
        let bad = |name: &str, e: &dyn std::fmt::Display| {
            CoreError::bad_request(format!("invalid design entry {name}: {e}"))
        };
        for (name, entry) in obj.iter() {
            if name == "validate" {
                design.validate = from_value(entry).map_err(|e| bad(name, &e))?;
                for rule in &design.validate {
                    if let ValidationRule::Selector(selector) = rule {
                        flatten(selector)?;
                    }
                }
            } else if name.starts_with(UPDATE_PREFIX) {
                let f = from_value(entry).map_err(|e| bad(name, &e))?;
                design.updates.insert(name.to_string(), f);
            } else if name.starts_with(QUERY_PREFIX) {
                let q: FindQuery = from_value(entry).map_err(|e| bad(name, &e))?;
                q.validate()?;
                design.queries.insert(name.to_string(), q);
            } else if name.starts_with(REDUCER_PREFIX) {
                let r = from_value(entry).map_err(|e| bad(name, &e))?;
                design.reducers.insert(name.to_string(), r);
            } else if name.starts_with(VIEW_FILTER_PREFIX) {
                flatten(entry)?;
                design.view_filters.insert(name.to_string(), entry.clone());
            } else if name != ID_FIELD && name != "_rev" {
                return Err(CoreError::bad_request(format!(
                    "unknown design entry {name}"
                )));
            }
        }
        Ok(design)
    }

    /// Renders the bundle back to its stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be serialized.
    pub fn to_value(&self) -> CoreResult<Value> {
        let mut out = Map::new();
        if !self.validate.is_empty() {
            out.insert("validate", to_value(&self.validate)?);
        }
        for (name, f) in &self.updates {
            out.insert(name.clone(), to_value(f)?);
        }
        for (name, q) in &self.queries {
            out.insert(name.clone(), to_value(q)?);
        }
        for (name, r) in &self.reducers {
            out.insert(name.clone(), to_value(r)?);
        }
        for (name, s) in &self.view_filters {
            out.insert(name.clone(), s.clone());
        }
        Ok(Value::Object(out))
    }

    /// Checks a document write against the validation rules.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` naming the first rule that rejects it.
    pub fn check_write(&self, doc: &Value, old: Option<&Value>) -> CoreResult<()> {
        for rule in &self.validate {
            match rule {
                ValidationRule::Required(fields) => {
                    if let Some(missing) = fields.iter().find(|f| doc.get_path(f).is_none()) {
                        return Err(CoreError::validation(format!("{missing} is required")));
                    }
                }
                ValidationRule::Selector(selector) => {
                    if !matches(doc, &flatten(selector)?) {
                        return Err(CoreError::validation(
                            "document does not match the validation selector",
                        ));
                    }
                }
                ValidationRule::Immutable(fields) => {
                    let Some(old) = old else { continue };
                    if let Some(changed) = fields.iter().find(|f| {
                        compare_opt(doc.get_path(f), old.get_path(f)) != Ordering::Equal
                    }) {
                        return Err(CoreError::validation(format!("{changed} is immutable")));
                    }
                }
                ValidationRule::ForbidDelete(_) => {}
            }
        }
        Ok(())
    }

    /// Checks a deletion against the validation rules.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if deletions are forbidden.
    pub fn check_delete(&self) -> CoreResult<()> {
        if self
            .validate
            .iter()
            .any(|r| matches!(r, ValidationRule::ForbidDelete(true)))
        {
            return Err(CoreError::validation("deletions are forbidden"));
        }
        Ok(())
    }

    /// Keeps the view rows that pass every named filter.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if a name is not an installed filter.
    pub fn filter_view_rows(&self, names: &[String], rows: Vec<Value>) -> CoreResult<Vec<Value>> {
        let mut filters = Vec::with_capacity(names.len());
        for name in names {
            let selector = self
                .view_filters
                .get(name)
                .ok_or_else(|| CoreError::bad_request(format!("unknown view filter {name}")))?;
            filters.push(flatten(selector)?);
        }
        Ok(rows
            .into_iter()
            .filter(|row| filters.iter().all(|f| matches(row, f)))
            .collect())
    }
}
