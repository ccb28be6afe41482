//! Selector flattening and matching.
//!
//! A selector is a nested object of field paths. A node whose single key
//! is an operator (`$eq`, `$in`, ...) is a condition; any other object
//! node is descended into, joining keys with `.`; any other value is an
//! implicit `$eq`.
//!
//! ```
//! use recliner_codec::value;
//! use recliner_core::selector::{flatten, matches};
//!
//! let selector = flatten(&value!({"address": {"city": "Oslo"}, "age": {"$gte": 18}})).unwrap();
//! assert!(matches(&value!({"address": {"city": "Oslo"}, "age": 30}), &selector));
//! assert!(!matches(&value!({"address": {"city": "Oslo"}, "age": 12}), &selector));
//! ```

use crate::error::{CoreError, CoreResult};
use recliner_codec::{compare, Map, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::fmt;

/// Fields whose name ends with this suffix hold arrays matched element-wise
/// by `$eq`, `$in` and `$nin`, and are indexed per element.
pub const MULTI_ENTRY_SUFFIX: &str = "_m";

/// Returns true if `field` uses multi-value matching.
pub fn is_multi_entry(field: &str) -> bool {
    field.ends_with(MULTI_ENTRY_SUFFIX)
}

/// A selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than or equal.
    Gte,
    /// Greater than.
    Gt,
    /// Field presence equals the operand's truthiness.
    Exists,
    /// Inside a `[low, high]` range or a `[[minX, minY], [maxX, maxY]]` box.
    Within,
    /// Negation of `Within`.
    NWithin,
    /// Member of the operand array.
    In,
    /// Not a member of the operand array.
    Nin,
    /// String matches a case-insensitive regular expression.
    Regex,
    /// Point `[x, y]` inside the operand polygon.
    IsInPolygon,
    /// Point `[x, y]` outside the operand polygon.
    IsNotInPolygon,
}

impl Operator {
    const ALL: [Operator; 14] = [
        Operator::Lt,
        Operator::Lte,
        Operator::Eq,
        Operator::Ne,
        Operator::Gte,
        Operator::Gt,
        Operator::Exists,
        Operator::Within,
        Operator::NWithin,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
        Operator::IsInPolygon,
        Operator::IsNotInPolygon,
    ];

    /// Returns the `$`-prefixed key for this operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gte => "$gte",
            Operator::Gt => "$gt",
            Operator::Exists => "$exists",
            Operator::Within => "$within",
            Operator::NWithin => "$nwithin",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Regex => "$regex",
            Operator::IsInPolygon => "$isInPolygon",
            Operator::IsNotInPolygon => "$isNotInPolygon",
        }
    }

    /// Parses an operator key, ignoring case.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(key))
    }

    /// Operators that cannot narrow a scan to one index range and are
    /// answered by probing once per operand value.
    pub fn is_multi_probe(self) -> bool {
        matches!(self, Operator::In)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened condition: an operator and its operand.
#[derive(Debug, Clone)]
pub struct Condition {
    /// The operator.
    pub op: Operator,
    /// The operand.
    pub value: Value,
    regex: Option<Regex>,
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.value == other.value
    }
}

impl Condition {
    /// Builds a condition, validating the operand shape.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for operands the operator cannot use.
    pub fn new(op: Operator, value: Value) -> CoreResult<Self> {
        let mut regex = None;
        match op {
            Operator::In | Operator::Nin if !value.is_array() => {
                return Err(CoreError::bad_request(format!("{op} requires an array")));
            }
            Operator::Within | Operator::NWithin
                if value.as_array().map(Vec::len) != Some(2) =>
            {
                return Err(CoreError::bad_request(format!(
                    "{op} requires a two element array"
                )));
            }
            Operator::IsInPolygon | Operator::IsNotInPolygon if !value.is_array() => {
                return Err(CoreError::bad_request(format!(
                    "{op} requires an array of points"
                )));
            }
            Operator::Regex => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| CoreError::bad_request("$regex requires a string"))?;
                regex = Some(
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| CoreError::bad_request(format!("invalid $regex: {e}")))?,
                );
            }
            _ => {}
        }
        Ok(Self { op, value, regex })
    }

    /// Evaluates the condition for the value found at `field`.
    pub fn test(&self, field: &str, found: Option<&Value>) -> bool {
        let Some(val) = found else {
            return self.op == Operator::Exists && !self.value.is_truthy();
        };
        let multi = is_multi_entry(field);
        let operand = &self.value;
        match self.op {
            Operator::Exists => self.value.is_truthy(),
            Operator::Lt => compare(val, operand) == Ordering::Less,
            Operator::Lte => compare(val, operand) != Ordering::Greater,
            Operator::Gt => compare(val, operand) == Ordering::Greater,
            Operator::Gte => compare(val, operand) != Ordering::Less,
            Operator::Ne => compare(val, operand) != Ordering::Equal,
            Operator::Eq => match (multi, val) {
                (true, Value::Array(items)) => contains(items, operand),
                _ => compare(val, operand) == Ordering::Equal,
            },
            Operator::In => {
                let wanted = operand.as_array().map(Vec::as_slice).unwrap_or_default();
                match (multi, val) {
                    (true, Value::Array(items)) => wanted.iter().all(|w| contains(items, w)),
                    _ => contains(wanted, val),
                }
            }
            Operator::Nin => {
                let unwanted = operand.as_array().map(Vec::as_slice).unwrap_or_default();
                match (multi, val) {
                    (true, Value::Array(items)) => !unwanted.iter().any(|u| contains(items, u)),
                    _ => !contains(unwanted, val),
                }
            }
            Operator::Regex => match (&self.regex, val) {
                (Some(re), Value::String(s)) => re.is_match(s),
                _ => false,
            },
            Operator::Within => within(val, operand),
            Operator::NWithin => !within(val, operand),
            Operator::IsInPolygon => point_in_polygon_value(val, operand) == Some(true),
            Operator::IsNotInPolygon => point_in_polygon_value(val, operand) == Some(false),
        }
    }
}

fn contains(items: &[Value], needle: &Value) -> bool {
    items.iter().any(|v| compare(v, needle) == Ordering::Equal)
}

fn point(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [x, y] => Some((x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

fn within(val: &Value, operand: &Value) -> bool {
    let Some([low, high]) = operand.as_array().map(Vec::as_slice) else {
        return false;
    };
    if low.is_array() && high.is_array() {
        match (point(val), point(low), point(high)) {
            (Some((x, y)), Some((min_x, min_y)), Some((max_x, max_y))) => {
                min_x <= x && x <= max_x && min_y <= y && y <= max_y
            }
            _ => false,
        }
    } else {
        compare(val, low) != Ordering::Less && compare(val, high) != Ordering::Greater
    }
}

fn point_in_polygon_value(val: &Value, polygon: &Value) -> Option<bool> {
    let p = point(val)?;
    let vertices = polygon
        .as_array()?
        .iter()
        .map(point)
        .collect::<Option<Vec<_>>>()?;
    Some(point_in_polygon(p, &vertices))
}

/// Even-odd ray casting test of `p` against a closed polygon.
pub fn point_in_polygon(p: (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let (x, y) = p;
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for (i, &(xi, yi)) in vertices.iter().enumerate() {
        let (xj, yj) = vertices[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A flattened selector: dotted field paths mapped to one condition each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatSelector {
    conditions: Vec<(String, Condition)>,
}

impl FlatSelector {
    /// Returns the number of conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Returns true if the selector matches everything.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Iterates over `(field, condition)` pairs in selector order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(f, c)| (f.as_str(), c))
    }

    /// Returns the condition on `field`.
    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.iter().find(|(f, _)| *f == field).map(|(_, c)| c)
    }

    /// Returns the first condition using a multi-probe operator.
    pub fn multi_probe(&self) -> Option<(&str, &Condition)> {
        self.iter().find(|(_, c)| c.op.is_multi_probe())
    }

    fn push(&mut self, field: String, condition: Condition) -> CoreResult<()> {
        if self.get(&field).is_some() {
            return Err(CoreError::bad_request(format!(
                "selector has more than one condition on {field}"
            )));
        }
        self.conditions.push((field, condition));
        Ok(())
    }

    /// Renders back to selector syntax, `{"a.b": {"$op": value}}`.
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.len());
        for (field, cond) in &self.conditions {
            let mut node = Map::with_capacity(1);
            node.insert(cond.op.as_str(), cond.value.clone());
            out.insert(field.clone(), Value::Object(node));
        }
        Value::Object(out)
    }
}

/// Flattens a selector.
///
/// # Errors
///
/// Returns `BadRequest` if the selector is not an object, a node mixes
/// operator keys with other keys, an operator is unknown, or an operand
/// has the wrong shape.
pub fn flatten(selector: &Value) -> CoreResult<FlatSelector> {
    let root = selector
        .as_object()
        .ok_or_else(|| CoreError::bad_request("selector must be an object"))?;
    let mut flat = FlatSelector::default();
    flatten_into(root, "", &mut flat)?;
    Ok(flat)
}

fn flatten_into(node: &Map, prefix: &str, flat: &mut FlatSelector) -> CoreResult<()> {
    let operator_keys = node.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys > 0 && node.len() > 1 {
        return Err(CoreError::bad_request(format!(
            "selector node {} mixes operators with other keys",
            if prefix.is_empty() { "<root>" } else { prefix }
        )));
    }
    for (key, value) in node.iter() {
        if key.starts_with('$') {
            let op = Operator::parse(key)
                .ok_or_else(|| CoreError::bad_request(format!("unknown operator {key}")))?;
            if prefix.is_empty() {
                return Err(CoreError::bad_request(format!(
                    "operator {key} must apply to a field"
                )));
            }
            flat.push(prefix.to_string(), Condition::new(op, value.clone())?)?;
            continue;
        }
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(child) => flatten_into(child, &path, flat)?,
            other => flat.push(path, Condition::new(Operator::Eq, other.clone())?)?,
        }
    }
    Ok(())
}

/// Flattens nested objects of a document into dotted leaf paths.
///
/// Arrays and scalars are leaves; empty objects produce no entries.
pub fn flatten_document(doc: &Value) -> Map {
    let mut out = Map::new();
    if let Some(root) = doc.as_object() {
        flatten_document_into(root, "", &mut out);
    }
    out
}

fn flatten_document_into(node: &Map, prefix: &str, out: &mut Map) {
    for (key, value) in node.iter() {
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(child) => flatten_document_into(child, &path, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Returns true if `doc` satisfies every condition of `selector`.
pub fn matches(doc: &Value, selector: &FlatSelector) -> bool {
    selector
        .iter()
        .all(|(field, cond)| cond.test(field, doc.get_path(field)))
}
