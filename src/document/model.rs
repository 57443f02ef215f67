//! Subject, Instance and embedded item types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::patch::FieldPatch;
use super::StoreError;

/// Unique identifier for a connected peer
pub type PeerId = Uuid;

/// Unique identifier for a Subject document
pub type SubjectId = Uuid;

/// Unique identifier for a placement
pub type InstanceId = Uuid;

/// Unique identifier for a scene
pub type SceneId = Uuid;

/// Persistent identifier of an embedded item
pub type ItemId = Uuid;

/// A document's field set
pub type Fields = Map<String, Value>;

/// Access a peer holds on a Subject
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwnershipLevel {
    None,
    Limited,
    Observer,
    Owner,
}

/// An item inside a named embedded collection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedItem {
    pub id: ItemId,
    pub data: Fields,
}

impl EmbeddedItem {
    pub fn new(data: Fields) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
        }
    }

    /// The item's value for `comparison_key`, rendered as a string key.
    pub fn key(&self, comparison_key: &str) -> Option<String> {
        super::patch::get_path(&self.data, comparison_key).map(key_string)
    }
}

/// Render a comparison-key value as a shorthand key.
pub(crate) fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Root persisted document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub fields: Fields,
    pub collections: BTreeMap<String, Vec<EmbeddedItem>>,
    pub ownership: BTreeMap<PeerId, OwnershipLevel>,
    /// Named array-valued fields (the rollback stack lives here)
    pub flags: BTreeMap<String, Vec<Value>>,
}

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            fields: Map::new(),
            collections: BTreeMap::new(),
            ownership: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_item(mut self, collection: impl Into<String>, data: Fields) -> Self {
        self.collections
            .entry(collection.into())
            .or_default()
            .push(EmbeddedItem::new(data));
        self
    }

    pub fn with_owner(mut self, peer: PeerId, level: OwnershipLevel) -> Self {
        self.ownership.insert(peer, level);
        self
    }

    pub fn ownership_of(&self, peer: &PeerId) -> OwnershipLevel {
        self.ownership.get(peer).copied().unwrap_or(OwnershipLevel::None)
    }

    pub fn collection(&self, name: &str) -> &[EmbeddedItem] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First item in collection order whose comparison key equals `key`.
    pub fn find_item(&self, collection: &str, comparison_key: &str, key: &str) -> Option<&EmbeddedItem> {
        self.collection(collection)
            .iter()
            .find(|item| item.key(comparison_key).as_deref() == Some(key))
    }

    pub(crate) fn create_items(&mut self, collection: &str, items: Vec<Fields>) -> Vec<ItemId> {
        let target = self.collections.entry(collection.to_string()).or_default();
        items
            .into_iter()
            .map(|data| {
                let item = EmbeddedItem::new(data);
                let id = item.id;
                target.push(item);
                id
            })
            .collect()
    }

    pub(crate) fn update_items(
        &mut self,
        collection: &str,
        updates: &[(ItemId, FieldPatch)],
    ) -> Result<(), StoreError> {
        let target = self.collections.entry(collection.to_string()).or_default();
        for (id, patch) in updates {
            let item = target
                .iter_mut()
                .find(|item| item.id == *id)
                .ok_or_else(|| StoreError::ItemNotFound {
                    collection: collection.to_string(),
                    item: *id,
                })?;
            patch.apply_to(&mut item.data);
        }
        Ok(())
    }

    pub(crate) fn delete_items(&mut self, collection: &str, ids: &[ItemId]) {
        if let Some(target) = self.collections.get_mut(collection) {
            target.retain(|item| !ids.contains(&item.id));
        }
    }
}

/// A placement referencing exactly one Subject
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub scene_id: SceneId,
    pub subject_id: SubjectId,
    pub fields: Fields,
}

impl Instance {
    pub fn new(scene_id: SceneId, subject_id: SubjectId) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id,
            subject_id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str) -> Fields {
        json!({ "name": name, "type": "consumable" }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_find_item_uses_first_match() {
        let subject = Subject::new("Goblin")
            .with_item("items", item("Potion"))
            .with_item("items", item("Potion"));

        let first_id = subject.collection("items")[0].id;
        let found = subject.find_item("items", "name", "Potion").unwrap();
        assert_eq!(found.id, first_id);
        assert!(subject.find_item("items", "name", "Sword").is_none());
    }

    #[test]
    fn test_non_string_keys_render_as_json() {
        let mut data = Map::new();
        data.insert("slot".into(), json!(3));
        let item = EmbeddedItem::new(data);
        assert_eq!(item.key("slot").as_deref(), Some("3"));
    }

    #[test]
    fn test_item_crud() {
        let mut subject = Subject::new("Goblin");
        let ids = subject.create_items("items", vec![item("Potion"), item("Rope")]);
        assert_eq!(subject.collection("items").len(), 2);

        subject
            .update_items("items", &[(ids[0], FieldPatch::new().set("name", "Elixir"))])
            .unwrap();
        assert!(subject.find_item("items", "name", "Elixir").is_some());

        subject.delete_items("items", &ids[1..]);
        assert_eq!(subject.collection("items").len(), 1);

        let missing = subject.update_items("items", &[(Uuid::new_v4(), FieldPatch::new())]);
        assert!(matches!(missing, Err(StoreError::ItemNotFound { .. })));
    }

    #[test]
    fn test_ownership_defaults_to_none() {
        let peer = Uuid::new_v4();
        let subject = Subject::new("Goblin");
        assert_eq!(subject.ownership_of(&peer), OwnershipLevel::None);
        let subject = subject.with_owner(peer, OwnershipLevel::Owner);
        assert_eq!(subject.ownership_of(&peer), OwnershipLevel::Owner);
    }
}
