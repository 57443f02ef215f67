//! Per-Subject rollback stack
//!
//! The stack is an ordered list of `RollbackEntry` values (bottom first)
//! stored as a flag on the Subject. Every change rewrites the whole list.

use std::sync::Arc;

use serde_json::Value;

use super::entry::RollbackEntry;
use super::RollbackError;
use crate::diff::{EmbeddedChange, Shorthand};
use crate::document::{
    is_beneath, join, remove_path, set_path, DocumentStore, FieldChange, FieldPatch, Fields, SubjectId,
};

#[derive(Clone)]
pub struct RollbackStack {
    store: Arc<dyn DocumentStore>,
    flag_key: String,
}

impl RollbackStack {
    pub fn new(store: Arc<dyn DocumentStore>, flag_key: impl Into<String>) -> Self {
        Self {
            store,
            flag_key: flag_key.into(),
        }
    }

    /// All entries, bottom first.
    pub async fn entries(&self, subject: SubjectId) -> Result<Vec<RollbackEntry>, RollbackError> {
        let raw = self
            .store
            .get_flag(subject, &self.flag_key)
            .await?
            .unwrap_or_default();

        raw.into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| RollbackError::Corrupt(e.to_string()))
            })
            .collect()
    }

    pub async fn find(&self, subject: SubjectId, name: &str) -> Result<Option<RollbackEntry>, RollbackError> {
        Ok(self
            .entries(subject)
            .await?
            .into_iter()
            .find(|entry| entry.name == name))
    }

    pub async fn contains(&self, subject: SubjectId, name: &str) -> Result<bool, RollbackError> {
        Ok(self.find(subject, name).await?.is_some())
    }

    /// Append an entry. Fails without writing if the name is already taken.
    pub async fn push(&self, subject: SubjectId, entry: RollbackEntry) -> Result<(), RollbackError> {
        let mut entries = self.entries(subject).await?;
        if entries.iter().any(|existing| existing.name == entry.name) {
            return Err(RollbackError::DuplicateName(entry.name));
        }
        log::debug!("Pushing rollback entry {} on {}", entry.name, subject);
        entries.push(entry);
        self.write(subject, &entries).await
    }

    /// Remove the top entry, or the named one with rebasing.
    ///
    /// Returns `None` if the stack is empty or no entry has that name.
    pub async fn pop(
        &self,
        subject: SubjectId,
        name: Option<&str>,
    ) -> Result<Option<RollbackEntry>, RollbackError> {
        let mut entries = self.entries(subject).await?;

        let removed = match name {
            None => entries.pop(),
            Some(name) => match entries.iter().position(|entry| entry.name == name) {
                Some(index) => Some(remove_and_rebase(&mut entries, index)),
                None => None,
            },
        };

        if removed.is_some() {
            self.write(subject, &entries).await?;
        }
        Ok(removed)
    }

    async fn write(&self, subject: SubjectId, entries: &[RollbackEntry]) -> Result<(), RollbackError> {
        let values = entries
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()
            .map_err(|e| RollbackError::Corrupt(e.to_string()))?;
        self.store.set_flag(subject, &self.flag_key, values).await?;
        Ok(())
    }
}

/// Remove `entries[index]` and rebase every entry above it.
///
/// Changes the removed entry shares with a higher entry are handed to the
/// lowest such entry and stripped from the removed one, so the topmost
/// entry touching a field keeps control of it.
pub fn remove_and_rebase(entries: &mut Vec<RollbackEntry>, index: usize) -> RollbackEntry {
    let mut removed = entries.remove(index);
    for higher in entries.iter_mut().skip(index) {
        hand_over(&mut removed.delta, &mut higher.delta);
    }
    if index < entries.len() {
        log::debug!("Rebased {} entries above {}", entries.len() - index, removed.name);
    }
    removed
}

fn hand_over(removed: &mut Shorthand, higher: &mut Shorthand) {
    hand_over_paths(&mut removed.root, &mut higher.root);
    hand_over_paths(&mut removed.placement, &mut higher.placement);

    for (collection, higher_changes) in higher.embedded.iter_mut() {
        let removed_changes = match removed.embedded.get_mut(collection) {
            Some(changes) => changes,
            None => continue,
        };

        for (key, higher_change) in higher_changes.iter_mut() {
            let removed_change = match removed_changes.get_mut(key) {
                Some(change) => change,
                None => continue,
            };

            if let (EmbeddedChange::Update(removed_patch), EmbeddedChange::Update(higher_patch)) =
                (&mut *removed_change, &mut *higher_change)
            {
                hand_over_paths(removed_patch, higher_patch);
                if removed_patch.is_empty() {
                    removed_changes.remove(key);
                }
            } else if let Some(change) = removed_changes.remove(key) {
                *higher_change = change;
            }
        }
    }

    removed.embedded.retain(|_, changes| !changes.is_empty());
}

/// Hand path changes shared with `higher` over to it.
///
/// Paths overlap when equal or when one lies beneath the other. The higher
/// entry ends up restoring the older value for the whole overlap, and the
/// removed entry keeps only what no higher entry controls.
fn hand_over_paths(removed: &mut FieldPatch, higher: &mut FieldPatch) {
    let paths: Vec<String> = removed.paths().cloned().collect();

    for path in paths {
        if higher.contains(&path) {
            if let Some(change) = removed.take(&path) {
                higher.insert(path, change);
            }
            continue;
        }

        let beneath: Vec<String> = higher
            .paths()
            .filter(|controlled| is_beneath(controlled, &path))
            .cloned()
            .collect();
        if !beneath.is_empty() {
            let change = match removed.take(&path) {
                Some(change) => change,
                None => continue,
            };
            for controlled in &beneath {
                higher.take(controlled);
            }
            // Leaves outside the higher entry's reach still revert now
            if let FieldChange::Set(Value::Object(old)) = &change {
                for (leaf, leaf_change) in FieldPatch::from_object(old).iter() {
                    let full = join(&path, leaf);
                    let overlaps = beneath.iter().any(|controlled| {
                        *controlled == full || is_beneath(&full, controlled) || is_beneath(controlled, &full)
                    });
                    if !overlaps {
                        removed.insert(full, leaf_change.clone());
                    }
                }
            }
            higher.insert(path, change);
            continue;
        }

        let ancestor = higher.paths().find(|controlled| is_beneath(&path, controlled)).cloned();
        if let Some(ancestor) = ancestor {
            if let (Some(change), Some(controlling)) = (removed.take(&path), higher.get_mut(&ancestor)) {
                merge_beneath(controlling, &path[ancestor.len() + 1..], change);
            }
        }
    }
}

/// Fold a change at `suffix` into the change controlling its ancestor.
fn merge_beneath(ancestor: &mut FieldChange, suffix: &str, change: FieldChange) {
    let mut object = match ancestor {
        FieldChange::Set(Value::Object(map)) => map.clone(),
        _ if change == FieldChange::Remove => return,
        _ => Fields::new(),
    };
    match change {
        FieldChange::Set(value) => set_path(&mut object, suffix, value),
        FieldChange::Remove => remove_path(&mut object, suffix),
    }
    *ancestor = FieldChange::Set(Value::Object(object));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldChange, MemoryStore, Subject};
    use serde_json::json;
    use uuid::Uuid;

    fn entry(name: &str, delta: Shorthand) -> RollbackEntry {
        RollbackEntry::new(Uuid::new_v4(), name, delta)
    }

    async fn stack_with_subject() -> (RollbackStack, SubjectId) {
        let store = Arc::new(MemoryStore::new());
        let subject = Subject::new("Goblin");
        let id = subject.id;
        store.insert_subject(subject).unwrap();
        (RollbackStack::new(store, "mutate"), id)
    }

    #[tokio::test]
    async fn test_push_rejects_duplicate_names() {
        let (stack, subject) = stack_with_subject().await;
        stack.push(subject, entry("a", Shorthand::new())).await.unwrap();

        let result = stack.push(subject, entry("a", Shorthand::new())).await;
        assert!(matches!(result, Err(RollbackError::DuplicateName(name)) if name == "a"));
        assert_eq!(stack.entries(subject).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pop_without_name_is_lifo() {
        let (stack, subject) = stack_with_subject().await;
        stack.push(subject, entry("a", Shorthand::new())).await.unwrap();
        stack.push(subject, entry("b", Shorthand::new())).await.unwrap();

        let popped = stack.pop(subject, None).await.unwrap().unwrap();
        assert_eq!(popped.name, "b");
        assert_eq!(stack.pop(subject, None).await.unwrap().unwrap().name, "a");
        assert!(stack.pop(subject, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_unknown_name_leaves_stack() {
        let (stack, subject) = stack_with_subject().await;
        stack.push(subject, entry("a", Shorthand::new())).await.unwrap();

        assert!(stack.pop(subject, Some("zzz")).await.unwrap().is_none());
        assert!(stack.contains(subject, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_named_pop_rebases_shared_fields() {
        let (stack, subject) = stack_with_subject().await;
        // x: 0 -> 1 (A, unrelated), 1 -> 2 (B), 2 -> 3 (C)
        stack.push(subject, entry("A", Shorthand::new().set("y", 0))).await.unwrap();
        stack
            .push(subject, entry("B", Shorthand::new().set("x", 1).set("z", 9)))
            .await
            .unwrap();
        stack.push(subject, entry("C", Shorthand::new().set("x", 2))).await.unwrap();

        let removed = stack.pop(subject, Some("B")).await.unwrap().unwrap();
        assert!(!removed.delta.root.contains("x"));
        assert_eq!(removed.delta.root.get("z"), Some(&FieldChange::Set(json!(9))));

        let remaining = stack.entries(subject).await.unwrap();
        let names: Vec<_> = remaining.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(remaining[1].delta.root.get("x"), Some(&FieldChange::Set(json!(1))));
    }

    #[test]
    fn test_rebase_hands_over_to_lowest_higher_entry() {
        let mut entries = vec![
            entry("B", Shorthand::new().set("x", 1)),
            entry("C", Shorthand::new().set("x", 2)),
            entry("D", Shorthand::new().set("x", 3)),
        ];

        remove_and_rebase(&mut entries, 0);
        assert_eq!(entries[0].delta.root.get("x"), Some(&FieldChange::Set(json!(1))));
        assert_eq!(entries[1].delta.root.get("x"), Some(&FieldChange::Set(json!(3))));
    }

    #[test]
    fn test_rebase_embedded_changes() {
        let mut entries = vec![
            entry(
                "B",
                Shorthand::new()
                    .update("items", "Potion", FieldPatch::new().set("qty", 1).set("label", "p"))
                    .delete("items", "Torch"),
            ),
            entry(
                "C",
                Shorthand::new()
                    .update("items", "Potion", FieldPatch::new().set("qty", 2))
                    .update("items", "Torch", FieldPatch::new().set("lit", false)),
            ),
        ];

        let removed = remove_and_rebase(&mut entries, 0);

        let higher = &entries[0].delta.embedded["items"];
        assert_eq!(
            higher.get("Potion"),
            Some(&EmbeddedChange::Update(FieldPatch::new().set("qty", 1)))
        );
        assert_eq!(higher.get("Torch"), Some(&EmbeddedChange::Delete));
        assert_eq!(
            removed.delta.embedded["items"].get("Potion"),
            Some(&EmbeddedChange::Update(FieldPatch::new().set("label", "p")))
        );
        assert!(!removed.delta.embedded["items"].contains_key("Torch"));
    }

    #[tokio::test]
    async fn test_named_pop_hands_parent_path_to_child_owner() {
        let (stack, subject) = stack_with_subject().await;
        // B created attrs = {hp: 5}, then C raised attrs.hp to 8
        stack.push(subject, entry("B", Shorthand::new().unset("attrs"))).await.unwrap();
        stack.push(subject, entry("C", Shorthand::new().set("attrs.hp", 5))).await.unwrap();

        let removed = stack.pop(subject, Some("B")).await.unwrap().unwrap();
        assert!(removed.delta.root.is_empty());

        let remaining = stack.entries(subject).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].delta.root, FieldPatch::new().remove("attrs"));

        let mut fields = Fields::new();
        fields.insert("attrs".into(), json!({ "hp": 8 }));
        removed.revert_shorthand().root.apply_to(&mut fields);
        assert_eq!(fields["attrs"], json!({ "hp": 8 }));
        remaining[0].revert_shorthand().root.apply_to(&mut fields);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_rebase_keeps_uncontrolled_leaves_of_parent_value() {
        let mut entries = vec![
            entry("B", Shorthand::new().set("stats", json!({ "hp": 5, "mp": 3 }))),
            entry("C", Shorthand::new().set("stats.hp", 1)),
        ];

        let removed = remove_and_rebase(&mut entries, 0);
        assert_eq!(removed.delta.root, FieldPatch::new().set("stats.mp", 3));
        assert_eq!(
            entries[0].delta.root,
            FieldPatch::new().set("stats", json!({ "hp": 5, "mp": 3 }))
        );
    }

    #[test]
    fn test_rebase_folds_child_path_into_parent_owner() {
        let mut entries = vec![
            entry("B", Shorthand::new().set("attrs.hp", 5).set("x", 1)),
            entry("C", Shorthand::new().set("attrs", json!({ "hp": 7, "mp": 1 }))),
        ];

        let removed = remove_and_rebase(&mut entries, 0);
        assert_eq!(removed.delta.root, FieldPatch::new().set("x", 1));
        assert_eq!(
            entries[0].delta.root,
            FieldPatch::new().set("attrs", json!({ "hp": 5, "mp": 1 }))
        );
    }
}
