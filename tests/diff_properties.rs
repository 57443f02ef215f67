use proptest::prelude::*;
use serde_json::Value;

use steward::diff::{diff, invert_patch};
use steward::document::{FieldPatch, Fields};

fn value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
        Just(Value::Null),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-d]", inner, 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    })
}

fn fields() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map("[a-e]", value(), 0..5).prop_map(|map| map.into_iter().collect())
}

proptest! {
    #[test]
    fn diff_restores_base(base in fields(), other in fields()) {
        let patch = diff(&base, &other);
        prop_assert_eq!(patch.applied(&other), base);
    }

    #[test]
    fn diff_of_identical_fields_is_empty(base in fields()) {
        prop_assert!(diff(&base, &base).is_empty());
    }

    #[test]
    fn inverted_update_restores_current(current in fields(), update in fields()) {
        let update = FieldPatch::from_object(&update);
        let inverse = invert_patch(&current, &update);
        prop_assert_eq!(inverse.applied(&update.applied(&current)), current);
    }
}
