//! Writing a Shorthand through the store

use crate::diff::{
    apply_collection, resolve_collection, CollectionOps, Shorthand, ValidationError, Validators,
};
use crate::document::{DocumentStore, Instance, StoreError, Subject};

/// Resolved embedded operations for one Shorthand.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddedPlan {
    pub collections: Vec<(String, CollectionOps)>,
    /// Collections whose validation failed; nothing is written for them
    pub skipped: Vec<(String, ValidationError)>,
}

impl EmbeddedPlan {
    pub fn is_skipped(&self, collection: &str) -> bool {
        self.skipped.iter().any(|(name, _)| name == collection)
    }
}

/// Resolve every embedded collection of `shorthand` against `subject`.
/// A failed collection is recorded and logged; its siblings still resolve.
pub fn plan_embedded(
    subject: &Subject,
    shorthand: &Shorthand,
    validators: &Validators,
    default_comparison_key: &str,
) -> EmbeddedPlan {
    let mut plan = EmbeddedPlan::default();

    for (collection, changes) in &shorthand.embedded {
        let key = shorthand.comparison_key_for(collection, default_comparison_key);
        match resolve_collection(
            collection,
            subject.collection(collection),
            changes,
            key,
            validators.get(collection),
        ) {
            Ok(ops) if ops.is_empty() => {}
            Ok(ops) => plan.collections.push((collection.clone(), ops)),
            Err(e) => {
                log::warn!("Skipping {} on {}: {}", collection, subject.name, e);
                plan.skipped.push((collection.clone(), e));
            }
        }
    }

    plan
}

/// Root fields first, then the placement, then embedded collections.
pub(crate) async fn apply_shorthand(
    store: &dyn DocumentStore,
    instance: &Instance,
    shorthand: &Shorthand,
    plan: EmbeddedPlan,
) -> Result<(), StoreError> {
    if !shorthand.root.is_empty() {
        store.update_subject(instance.subject_id, &shorthand.root).await?;
    }
    if !shorthand.placement.is_empty() {
        store.update_instance(instance.id, &shorthand.placement).await?;
    }
    for (collection, ops) in plan.collections {
        apply_collection(store, instance.subject_id, &collection, ops).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::RequiredFields;
    use crate::document::{Fields, MemoryStore};
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn object(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_failed_collection_leaves_siblings_and_root() {
        let store = MemoryStore::new();
        let subject = Subject::new("Goblin")
            .with_field("hp", 10)
            .with_item("items", object(json!({ "name": "Potion", "type": "consumable" })))
            .with_item("spells", object(json!({ "name": "Zap" })));
        let instance = Instance::new(Uuid::new_v4(), subject.id);
        store.insert_subject(subject.clone()).unwrap();
        store.insert_instance(instance.clone()).unwrap();

        let validators = Validators::new().with("items", RequiredFields::new(["type"]));
        let shorthand = Shorthand::new()
            .set("hp", 12)
            .create("items", "Torch", Fields::new())
            .delete("spells", "Zap");

        let plan = plan_embedded(&subject, &shorthand, &validators, "name");
        assert!(plan.is_skipped("items"));
        assert_eq!(plan.collections.len(), 1);

        apply_shorthand(&store, &instance, &shorthand, plan).await.unwrap();

        let after = store.subject(subject.id).await.unwrap();
        assert_eq!(after.fields.get("hp"), Some(&json!(12)));
        assert_eq!(after.collection("items").len(), 1);
        assert!(after.collection("spells").is_empty());
    }
}
