//! Totally ordered keys for primary and secondary indexes.

use recliner_codec::{compare, Value};
use std::cmp::Ordering;

/// Returns true if `value` can be used as a primary or index key.
///
/// Valid keys are finite numbers, strings, and arrays of valid keys.
pub fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_finite(),
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_valid_key),
        _ => false,
    }
}

/// A validated key, ordered by the shared value collation.
#[derive(Debug, Clone)]
pub struct Key(Value);

impl Key {
    /// Wraps a value, returning `None` if it is not a valid key.
    pub fn new(value: Value) -> Option<Self> {
        is_valid_key(&value).then_some(Self(value))
    }

    /// Returns the wrapped value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Unwraps into the inner value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}
