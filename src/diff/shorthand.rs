//! Shorthand update descriptions and their inversion

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::structural::{diff, invert_patch};
use crate::document::{EmbeddedItem, FieldPatch, Fields, Instance, Subject};

/// Change to a single keyed item of an embedded collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EmbeddedChange {
    /// Full item data. Updates the matching item if one exists.
    Create(Fields),
    /// Partial field changes. Creates the item if nothing matches.
    Update(FieldPatch),
    Delete,
}

/// Changes to one embedded collection, keyed by comparison-key value.
pub type CollectionShorthand = BTreeMap<String, EmbeddedChange>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShorthandConfig {
    /// Comparison key per collection. Collections not listed use the
    /// configured default.
    pub comparison_keys: BTreeMap<String, String>,
}

/// Human-keyed description of an update to a Subject, its embedded
/// collections and the placement it is reached through.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Shorthand {
    pub root: FieldPatch,
    pub placement: FieldPatch,
    pub embedded: BTreeMap<String, CollectionShorthand>,
    pub config: ShorthandConfig,
}

impl Shorthand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.root = self.root.set(path, value);
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.root = self.root.remove(path);
        self
    }

    pub fn with_root(mut self, root: FieldPatch) -> Self {
        self.root = root;
        self
    }

    pub fn place(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.placement = self.placement.set(path, value);
        self
    }

    pub fn create(mut self, collection: impl Into<String>, key: impl Into<String>, data: Fields) -> Self {
        self.change(collection, key, EmbeddedChange::Create(data));
        self
    }

    pub fn update(
        mut self,
        collection: impl Into<String>,
        key: impl Into<String>,
        patch: FieldPatch,
    ) -> Self {
        self.change(collection, key, EmbeddedChange::Update(patch));
        self
    }

    pub fn delete(mut self, collection: impl Into<String>, key: impl Into<String>) -> Self {
        self.change(collection, key, EmbeddedChange::Delete);
        self
    }

    pub fn comparison_key(mut self, collection: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.comparison_keys.insert(collection.into(), key.into());
        self
    }

    pub fn change(&mut self, collection: impl Into<String>, key: impl Into<String>, change: EmbeddedChange) {
        self.embedded
            .entry(collection.into())
            .or_default()
            .insert(key.into(), change);
    }

    /// Comparison key for `collection`, falling back to `default`.
    pub fn comparison_key_for<'a>(&'a self, collection: &str, default: &'a str) -> &'a str {
        self.config
            .comparison_keys
            .get(collection)
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
            && self.placement.is_empty()
            && self.embedded.values().all(BTreeMap::is_empty)
    }
}

/// Compute the inverse of applying `updates` to a collection.
///
/// `items` is the collection before the update. The result, applied after
/// `updates`, restores the collection's field sets:
/// - a Delete of an existing item becomes a Create of its snapshot
/// - a change to an existing item becomes an Update keyed by the item's
///   comparison-key value after the change
/// - a change that matched nothing was an addition and becomes a Delete
///
/// Items are matched by the first one in collection order whose comparison
/// key equals the shorthand key.
pub fn invert_shorthand(
    items: &[EmbeddedItem],
    updates: &CollectionShorthand,
    comparison_key: &str,
) -> CollectionShorthand {
    let mut inverse = CollectionShorthand::new();

    for (key, change) in updates {
        let existing = items
            .iter()
            .find(|item| item.key(comparison_key).as_deref() == Some(key.as_str()));

        match (change, existing) {
            (EmbeddedChange::Delete, Some(item)) => {
                inverse.insert(key.clone(), EmbeddedChange::Create(item.data.clone()));
            }
            (EmbeddedChange::Delete, None) => {
                log::debug!("Delete of unknown key {key} has no inverse");
            }
            (change, Some(item)) => {
                let after = updated_fields(&item.data, change);
                let restore = diff(&item.data, &after);
                if restore.is_empty() {
                    continue;
                }
                let post_key = EmbeddedItem {
                    id: item.id,
                    data: after,
                }
                .key(comparison_key)
                .unwrap_or_else(|| key.clone());
                inverse.insert(post_key, EmbeddedChange::Update(restore));
            }
            (_, None) => {
                inverse.insert(key.clone(), EmbeddedChange::Delete);
            }
        }
    }

    inverse
}

fn updated_fields(current: &Fields, change: &EmbeddedChange) -> Fields {
    match change {
        EmbeddedChange::Create(data) => FieldPatch::from_object(data).applied(current),
        EmbeddedChange::Update(patch) => patch.applied(current),
        EmbeddedChange::Delete => current.clone(),
    }
}

/// Inverse of a whole Shorthand against the current Subject and Instance.
pub fn invert(
    subject: &Subject,
    instance: &Instance,
    shorthand: &Shorthand,
    default_comparison_key: &str,
) -> Shorthand {
    let mut inverse = Shorthand {
        root: invert_patch(&subject.fields, &shorthand.root),
        placement: invert_patch(&instance.fields, &shorthand.placement),
        embedded: BTreeMap::new(),
        config: shorthand.config.clone(),
    };

    for (collection, updates) in &shorthand.embedded {
        let key = shorthand.comparison_key_for(collection, default_comparison_key);
        let collection_inverse = invert_shorthand(subject.collection(collection), updates, key);
        if !collection_inverse.is_empty() {
            inverse.embedded.insert(collection.clone(), collection_inverse);
        }
    }

    inverse
}
