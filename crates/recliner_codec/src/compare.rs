//! Collation of heterogeneous values.
//!
//! Values of different types order by type rank:
//!
//! | rank | type |
//! |------|------|
//! | 0 | absent, null |
//! | 1 | boolean |
//! | 2 | number |
//! | 3 | string |
//! | 4 | array |
//! | 5 | object |
//!
//! Within a type, numbers compare numerically, strings use a
//! locale-style collation (case-insensitive first, lowercase before
//! uppercase on ties), arrays compare element-wise and then by length,
//! and objects compare field-by-field in the first operand's key order
//! and then by key count.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Compares two values.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    compare_opt(Some(a), Some(b))
}

/// Compares two possibly-absent values. Absent ties with null.
pub fn compare_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(*x, *y),
        (Some(Value::String(x)), Some(Value::String(y))) => compare_strings(x, y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            for (key, vx) in x.iter() {
                let ord = compare_opt(Some(vx), y.get(key));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: f64, y: f64) -> Ordering {
    x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
}

/// Locale-style string collation.
///
/// Case-folded text decides first, then the case pattern (lowercase
/// first), then raw code points so that distinct strings never tie.
pub fn compare_strings(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded
        .then_with(|| {
            a.chars()
                .map(char::is_uppercase)
                .cmp(b.chars().map(char::is_uppercase))
        })
        .then_with(|| a.cmp(b))
}

/// Sort direction for one field of a multi-field ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortDirection {
    /// Applies this direction to an ascending ordering.
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

/// One field of a [`SortComparator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Path segments into the document.
    pub path: Vec<String>,
    /// Direction for this field.
    pub direction: SortDirection,
}

/// Multi-field ordering over documents.
///
/// Fields are consulted in order and the first non-equal field decides.
///
/// ```
/// use recliner_codec::{value, SortComparator, SortDirection};
///
/// let mut docs = vec![value!({"age": 1}), value!({"age": 5}), value!({"age": 3})];
/// SortComparator::new().field("age", SortDirection::Desc).sort(&mut docs);
/// assert_eq!(docs, vec![value!({"age": 5}), value!({"age": 3}), value!({"age": 1})]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortComparator {
    fields: Vec<SortField>,
}

impl SortComparator {
    /// Creates a comparator with no fields (everything compares equal).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dotted field path with a direction.
    #[must_use]
    pub fn field(self, path: &str, direction: SortDirection) -> Self {
        self.segments(path.split('.').map(str::to_string).collect(), direction)
    }

    /// Adds a pre-split field path with a direction.
    #[must_use]
    pub fn segments(mut self, path: Vec<String>, direction: SortDirection) -> Self {
        self.fields.push(SortField { path, direction });
        self
    }

    /// Returns the configured fields.
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    /// Returns true if no field has been added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compares two documents.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for field in &self.fields {
            let va = a.get_segments(field.path.iter().map(String::as_str));
            let vb = b.get_segments(field.path.iter().map(String::as_str));
            let ord = field.direction.apply(compare_opt(va, vb));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Sorts documents in place (stable).
    pub fn sort(&self, docs: &mut [Value]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn type_rank_order() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::from(-3),
            Value::from(10),
            Value::from("A"),
            Value::from("b"),
            value!([1]),
            value!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{pair:?}");
        }
    }

    #[test]
    fn absent_ties_with_null() {
        assert_eq!(compare_opt(None, Some(&Value::Null)), Ordering::Equal);
        assert_eq!(compare_opt(None, Some(&Value::from(0))), Ordering::Less);
    }

    #[test]
    fn strings_collate_case_insensitively() {
        assert_eq!(compare_strings("apple", "Banana"), Ordering::Less);
        assert_eq!(compare_strings("a", "A"), Ordering::Less);
        assert_eq!(compare_strings("abc", "abc"), Ordering::Equal);
        assert_eq!(compare_strings("ab", "abc"), Ordering::Less);
    }

    #[test]
    fn arrays_then_length() {
        assert_eq!(compare(&value!([1, 2]), &value!([1, 3])), Ordering::Less);
        assert_eq!(compare(&value!([1, 2]), &value!([1, 2, 0])), Ordering::Less);
        assert_eq!(compare(&value!([2]), &value!([1, 9, 9])), Ordering::Greater);
    }

    #[test]
    fn objects_by_first_operand_keys() {
        assert_eq!(
            compare(&value!({"a": 1, "b": 2}), &value!({"a": 1, "b": 3})),
            Ordering::Less
        );
        assert_eq!(compare(&value!({}), &value!({})), Ordering::Equal);
        assert_eq!(
            compare(&value!({"a": 1}), &value!({"a": 1, "b": 1})),
            Ordering::Less
        );
    }

    #[test]
    fn antisymmetric_on_samples() {
        let samples = [
            value!(null),
            value!(true),
            value!(2.5),
            value!("x"),
            value!(["x", 1]),
            value!({"k": [1, 2]}),
        ];
        for a in &samples {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in &samples {
                assert_eq!(compare(a, b), compare(b, a).reverse());
            }
        }
    }

    #[test]
    fn sort_descending_by_age() {
        let mut docs = vec![value!({"age": 1}), value!({"age": 5}), value!({"age": 3})];
        SortComparator::new()
            .field("age", SortDirection::Desc)
            .sort(&mut docs);
        assert_eq!(
            docs,
            vec![value!({"age": 5}), value!({"age": 3}), value!({"age": 1})]
        );
    }

    #[test]
    fn first_mismatch_wins_with_nested_paths() {
        let cmp = SortComparator::new()
            .field("name.last", SortDirection::Asc)
            .field("age", SortDirection::Desc);
        let a = value!({"name": {"last": "Smith"}, "age": 30});
        let b = value!({"name": {"last": "Smith"}, "age": 40});
        let c = value!({"name": {"last": "Jones"}, "age": 99});
        assert_eq!(cmp.compare(&a, &b), Ordering::Greater);
        assert_eq!(cmp.compare(&c, &a), Ordering::Less);
    }

    #[test]
    fn direction_parsing() {
        assert_eq!("DESC".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn string_collation_is_antisymmetric(a in "\\PC{0,8}", b in "\\PC{0,8}") {
            proptest::prop_assert_eq!(compare_strings(&a, &b), compare_strings(&b, &a).reverse());
        }
    }
}
