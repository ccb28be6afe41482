//! Property tests across the value model, selectors and revisions.

use crate::generators::*;
use proptest::prelude::*;
use recliner_codec::{compare, Value};
use recliner_core::selector::{flatten, flatten_document, matches};
use recliner_core::{content_hash, next_revision, Revision};
use std::cmp::Ordering;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn comparator_is_reflexive(v in value_strategy()) {
        prop_assert_eq!(compare(&v, &v), Ordering::Equal);
    }

    // Object comparison walks the left operand's keys, so only non-object
    // values are totally ordered.
    #[test]
    fn comparator_is_antisymmetric(a in array_value_strategy(), b in array_value_strategy()) {
        prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
    }

    #[test]
    fn comparator_is_transitive(
        a in array_value_strategy(),
        b in array_value_strategy(),
        c in array_value_strategy(),
    ) {
        let mut sorted = [a, b, c];
        sorted.sort_by(compare);
        prop_assert_ne!(compare(&sorted[0], &sorted[2]), Ordering::Greater);
    }

    #[test]
    fn flatten_is_idempotent(selector in selector_strategy()) {
        let once = flatten(&selector).unwrap();
        let twice = flatten(&once.to_value()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn document_matches_its_own_leaves(doc in document_strategy()) {
        let selector = Value::Object(flatten_document(&doc));
        let flat = flatten(&selector).unwrap();
        prop_assert!(matches(&doc, &flat));
    }

    #[test]
    fn empty_selector_matches_everything(doc in document_strategy()) {
        let flat = flatten(&Value::Object(Default::default())).unwrap();
        prop_assert!(matches(&doc, &flat));
    }

    #[test]
    fn revisions_advance_one_generation(doc in document_strategy(), generation in 1u64..1000) {
        let prior = Revision::new(generation, "x");
        let next = next_revision(Some(&prior), &doc).unwrap();
        prop_assert_eq!(next.generation, generation + 1);
        prop_assert_eq!(next.hash.len(), 64);
        prop_assert_eq!(next_revision(None, &doc).unwrap().generation, 1);
    }

    #[test]
    fn content_hash_ignores_rev(doc in document_strategy(), rev in "[1-9]-[a-f0-9]{8}") {
        let mut stamped = doc.clone();
        if let Some(map) = stamped.as_object_mut() {
            map.insert("_rev", rev);
        }
        prop_assert_eq!(content_hash(&doc).unwrap(), content_hash(&stamped).unwrap());
    }
}
