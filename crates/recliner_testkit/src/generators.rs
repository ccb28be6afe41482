//! Property-based test generators using proptest.
//!
//! Provides strategies for generating values, documents and selectors
//! that stay inside the shapes the engine accepts.

use proptest::prelude::*;
use recliner_codec::{Map, Value};

/// Strategy for field names: short, lowercase, no dots or `$`.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex")
}

/// Strategy for document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for finite numbers, mixing integers and fractions.
pub fn number_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        (-1000i64..1000).prop_map(|n| n as f64),
        (-1.0e6f64..1.0e6).prop_filter("finite", |f| f.is_finite()),
    ]
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number_strategy().prop_map(Value::Number),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,8}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for scalars and (nested) arrays of them.
pub fn array_value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::Array)
    })
}

/// Strategy for arbitrary JSON values, objects included.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map>())),
        ]
    })
}

/// Strategy for document bodies: nested objects with scalar leaves.
pub fn document_strategy() -> impl Strategy<Value = Value> {
    let leaf = scalar_strategy();
    let node = leaf.prop_recursive(2, 24, 4, |inner| {
        prop::collection::btree_map(field_name_strategy(), inner, 1..4)
            .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map>()))
    });
    prop::collection::btree_map(field_name_strategy(), node, 0..5)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map>()))
}

/// Strategy for one field condition: an implicit equality or an operator
/// node.
pub fn condition_strategy() -> impl Strategy<Value = Value> {
    let operand = prop_oneof![
        number_strategy().prop_map(Value::Number),
        prop::string::string_regex("[a-z]{0,6}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ];
    prop_oneof![
        scalar_strategy(),
        (
            prop::sample::select(vec!["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"]),
            operand.clone(),
        )
            .prop_map(|(op, v)| operator_node(op, v)),
        prop::collection::vec(operand.clone(), 1..4)
            .prop_map(|vs| operator_node("$in", Value::Array(vs))),
        prop::collection::vec(operand, 1..4)
            .prop_map(|vs| operator_node("$nin", Value::Array(vs))),
        any::<bool>().prop_map(|b| operator_node("$exists", Value::Bool(b))),
    ]
}

fn operator_node(op: &str, operand: Value) -> Value {
    let mut node = Map::with_capacity(1);
    node.insert(op, operand);
    Value::Object(node)
}

/// Strategy for selectors: nested field objects with one condition per
/// leaf path.
pub fn selector_strategy() -> impl Strategy<Value = Value> {
    let nested = prop::collection::btree_map(field_name_strategy(), condition_strategy(), 1..3)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map>()));
    prop::collection::btree_map(
        field_name_strategy(),
        prop_oneof![3 => condition_strategy(), 1 => nested],
        0..4,
    )
    .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map>()))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn field_names_are_plain(name in field_name_strategy()) {
            prop_assert!(!name.contains('.') && !name.starts_with('$'));
        }

        #[test]
        fn documents_are_objects(doc in document_strategy()) {
            prop_assert!(doc.is_object());
        }

        #[test]
        fn selectors_flatten(selector in selector_strategy()) {
            prop_assert!(recliner_core::selector::flatten(&selector).is_ok());
        }
    }
}
