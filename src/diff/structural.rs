//! Field-set diffing

use serde_json::Value;

use crate::document::{join, FieldChange, FieldPatch, Fields};

/// Compute the patch that turns `other` back into `base`.
///
/// Fields present in `other` but absent from `base` become explicit removals,
/// so applying the result to `other` restores `base` exactly. Objects present
/// on both sides are descended into; every other value (arrays included) is
/// compared and replaced whole.
pub fn diff(base: &Fields, other: &Fields) -> FieldPatch {
    let mut patch = FieldPatch::new();
    diff_into(base, other, "", &mut patch);
    patch
}

fn diff_into(base: &Fields, other: &Fields, prefix: &str, patch: &mut FieldPatch) {
    for (key, other_value) in other {
        let path = join(prefix, key);
        match base.get(key) {
            None => patch.insert(path, FieldChange::Remove),
            Some(Value::Object(base_inner)) if !base_inner.is_empty() => match other_value {
                Value::Object(other_inner) if !other_inner.is_empty() => {
                    diff_into(base_inner, other_inner, &path, patch)
                }
                _ => patch.insert(path, FieldChange::Set(Value::Object(base_inner.clone()))),
            },
            Some(base_value) if base_value != other_value => {
                patch.insert(path, FieldChange::Set(base_value.clone()))
            }
            Some(_) => {}
        }
    }

    for (key, base_value) in base {
        if !other.contains_key(key) {
            patch.insert(join(prefix, key), FieldChange::Set(base_value.clone()));
        }
    }
}

/// Inverse of applying `update` to `current`: the patch that restores `current`.
pub fn invert_patch(current: &Fields, update: &FieldPatch) -> FieldPatch {
    diff(current, &update.applied(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identical_sets_produce_empty_patch() {
        let fields = object(json!({ "hp": 10, "attrs": { "str": 3 } }));
        assert!(diff(&fields, &fields).is_empty());
    }

    #[test]
    fn test_added_fields_become_removals() {
        let base = object(json!({ "hp": 10 }));
        let other = object(json!({ "hp": 10, "temp": 5, "attrs": { "new": 1 } }));

        let patch = diff(&base, &other);
        assert_eq!(patch.get("temp"), Some(&FieldChange::Remove));
        assert_eq!(patch.get("attrs"), Some(&FieldChange::Remove));
        assert_eq!(patch.applied(&other), base);
    }

    #[test]
    fn test_nested_changes_use_leaf_paths() {
        let base = object(json!({ "attrs": { "hp": { "value": 10, "max": 20 } } }));
        let other = object(json!({ "attrs": { "hp": { "value": 15, "max": 20 } } }));

        let patch = diff(&base, &other);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("attrs.hp.value"), Some(&FieldChange::Set(json!(10))));
    }

    #[test]
    fn test_arrays_are_replaced_whole() {
        let base = object(json!({ "tags": ["a", "b"] }));
        let other = object(json!({ "tags": ["a", "b", "c"] }));

        let patch = diff(&base, &other);
        assert_eq!(patch.get("tags"), Some(&FieldChange::Set(json!(["a", "b"]))));
    }

    #[test]
    fn test_type_changes_restore_whole_value() {
        let base = object(json!({ "a": { "b": 1 }, "c": 2 }));
        let other = object(json!({ "a": 7, "c": { "d": 1 } }));

        assert_eq!(diff(&base, &other).applied(&other), base);
    }

    #[test]
    fn test_invert_patch_restores_removed_fields() {
        let current = object(json!({ "hp": 10, "status": { "prone": true } }));
        let update = FieldPatch::new().set("hp", 15).remove("status.prone");

        let inverse = invert_patch(&current, &update);
        let updated = update.applied(&current);
        assert_eq!(updated, object(json!({ "hp": 15, "status": {} })));
        assert_eq!(inverse.applied(&updated), current);
    }
}
