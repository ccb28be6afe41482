//! Key ranges and scan direction.

use crate::key::Key;
use recliner_codec::{compare, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Bound;

/// Iteration order of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Next,
    /// Descending key order.
    Prev,
}

/// A range over keys, with optionally open bounds at either end.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    /// Lower bound.
    pub lower: Bound<Value>,
    /// Upper bound.
    pub upper: Bound<Value>,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

fn bound(value: Value, open: bool) -> Bound<Value> {
    if open {
        Bound::Excluded(value)
    } else {
        Bound::Included(value)
    }
}

impl KeyRange {
    /// The unbounded range.
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Exactly one key.
    pub fn only(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            lower: Bound::Included(value.clone()),
            upper: Bound::Included(value),
        }
    }

    /// Keys above `value` (excluding it when `open`).
    pub fn lower_bound(value: impl Into<Value>, open: bool) -> Self {
        Self {
            lower: bound(value.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys below `value` (excluding it when `open`).
    pub fn upper_bound(value: impl Into<Value>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(value.into(), open),
        }
    }

    /// Keys between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    /// Returns true if `value` lies inside the range.
    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => compare(value, l) != Ordering::Less,
            Bound::Excluded(l) => compare(value, l) == Ordering::Greater,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => compare(value, u) != Ordering::Greater,
            Bound::Excluded(u) => compare(value, u) == Ordering::Less,
        };
        above && below
    }

    /// Converts the bounds to validated keys.
    pub(crate) fn to_key_bounds(&self) -> Option<(Bound<Key>, Bound<Key>)> {
        Some((to_key_bound(&self.lower)?, to_key_bound(&self.upper)?))
    }
}

fn to_key_bound(bound: &Bound<Value>) -> Option<Bound<Key>> {
    Some(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(v) => Bound::Included(Key::new(v.clone())?),
        Bound::Excluded(v) => Bound::Excluded(Key::new(v.clone())?),
    })
}

/// Returns true if no key can satisfy both bounds.
///
/// `BTreeMap::range` panics on inverted bounds, so callers check first.
pub(crate) fn bounds_are_empty(lower: &Bound<Key>, upper: &Bound<Key>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => {
            l >= u
        }
    }
}

/// Narrows bounds so a scan starts at `after` in the given direction.
///
/// The bound stays inclusive so that index entries sharing the resume key
/// but with a later primary key are still visited; the caller skips the
/// rest.
pub(crate) fn resume_bounds(
    lower: Bound<Key>,
    upper: Bound<Key>,
    after: &Key,
    direction: Direction,
) -> (Bound<Key>, Bound<Key>) {
    match direction {
        Direction::Next => {
            let lower = match lower {
                Bound::Included(l) if &l > after => Bound::Included(l),
                Bound::Excluded(l) if &l >= after => Bound::Excluded(l),
                _ => Bound::Included(after.clone()),
            };
            (lower, upper)
        }
        Direction::Prev => {
            let upper = match upper {
                Bound::Included(u) if &u < after => Bound::Included(u),
                Bound::Excluded(u) if &u <= after => Bound::Excluded(u),
                _ => Bound::Included(after.clone()),
            };
            (lower, upper)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;

    #[test]
    fn contains_respects_open_bounds() {
        let r = KeyRange::bound(1, 5, true, false);
        assert!(!r.contains(&value!(1)));
        assert!(r.contains(&value!(3)));
        assert!(r.contains(&value!(5)));
        assert!(!r.contains(&value!(6)));
        assert!(KeyRange::all().contains(&value!("x")));
    }

    #[test]
    fn only_matches_single_key() {
        let r = KeyRange::only("a");
        assert!(r.contains(&value!("a")));
        assert!(!r.contains(&value!("b")));
    }

    #[test]
    fn empty_bounds_detected() {
        let k = |n: i32| Key::new(Value::from(n)).unwrap();
        assert!(bounds_are_empty(&Bound::Included(k(5)), &Bound::Included(k(1))));
        assert!(bounds_are_empty(&Bound::Excluded(k(1)), &Bound::Included(k(1))));
        assert!(!bounds_are_empty(&Bound::Included(k(1)), &Bound::Included(k(1))));
        assert!(!bounds_are_empty(&Bound::Unbounded, &Bound::Included(k(1))));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(KeyRange::only(Value::Null).to_key_bounds().is_none());
        assert!(KeyRange::only(3).to_key_bounds().is_some());
    }
}
