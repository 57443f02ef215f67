//! Embedded-collection shorthand resolution
//!
//! Turns a keyed `CollectionShorthand` into concrete store operations
//! addressed by persistent id, then executes them adds first, updates next
//! and deletes last.

use std::collections::HashMap;
use std::sync::Arc;

use super::shorthand::{CollectionShorthand, EmbeddedChange};
use super::ValidationError;
use crate::document::{
    get_path, set_path, DocumentStore, EmbeddedItem, FieldPatch, Fields, ItemId, StoreError,
    SubjectId,
};

/// Concrete operations for one collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionOps {
    pub adds: Vec<Fields>,
    pub updates: Vec<(ItemId, FieldPatch)>,
    pub deletes: Vec<ItemId>,
}

impl CollectionOps {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Per-collection check run against new items before anything is written.
pub trait CollectionValidator: Send + Sync {
    fn validate_add(&self, collection: &str, key: &str, data: &Fields) -> Result<(), ValidationError>;
}

/// Requires every added item to carry the listed fields.
#[derive(Clone, Debug)]
pub struct RequiredFields(pub Vec<String>);

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }
}

impl CollectionValidator for RequiredFields {
    fn validate_add(&self, collection: &str, key: &str, data: &Fields) -> Result<(), ValidationError> {
        match self.0.iter().find(|field| get_path(data, field).is_none()) {
            Some(field) => Err(ValidationError::MissingField {
                collection: collection.to_string(),
                key: key.to_string(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Validators registered by collection name.
#[derive(Clone, Default)]
pub struct Validators {
    by_collection: HashMap<String, Arc<dyn CollectionValidator>>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collection: impl Into<String>, validator: impl CollectionValidator + 'static) {
        self.by_collection.insert(collection.into(), Arc::new(validator));
    }

    pub fn with(mut self, collection: impl Into<String>, validator: impl CollectionValidator + 'static) -> Self {
        self.register(collection, validator);
        self
    }

    pub fn get(&self, collection: &str) -> Option<&dyn CollectionValidator> {
        self.by_collection.get(collection).map(|v| v.as_ref())
    }
}

/// Classify each keyed change against the current items.
///
/// A Delete resolves to the matched item's id (and is dropped if nothing
/// matches). Any other change updates the matched item, or becomes an Add
/// whose comparison-key field is set to the shorthand key.
pub fn resolve_collection(
    collection: &str,
    items: &[EmbeddedItem],
    changes: &CollectionShorthand,
    comparison_key: &str,
    validator: Option<&dyn CollectionValidator>,
) -> Result<CollectionOps, ValidationError> {
    let mut ops = CollectionOps::default();

    for (key, change) in changes {
        let mut matches = items
            .iter()
            .filter(|item| item.key(comparison_key).as_deref() == Some(key.as_str()));
        let existing = matches.next();
        if matches.next().is_some() {
            log::warn!("Duplicate {comparison_key} {key:?} in {collection}; using the first match");
        }

        match (change, existing) {
            (EmbeddedChange::Delete, Some(item)) => ops.deletes.push(item.id),
            (EmbeddedChange::Delete, None) => {
                log::debug!("Nothing named {key:?} to delete in {collection}");
            }
            (EmbeddedChange::Create(data), Some(item)) => {
                ops.updates.push((item.id, FieldPatch::from_object(data)))
            }
            (EmbeddedChange::Update(patch), Some(item)) => ops.updates.push((item.id, patch.clone())),
            (EmbeddedChange::Create(data), None) => {
                let mut data = data.clone();
                set_path(&mut data, comparison_key, key.clone().into());
                ops.adds.push(data);
            }
            (EmbeddedChange::Update(patch), None) => {
                let mut data = patch.applied(&Fields::new());
                set_path(&mut data, comparison_key, key.clone().into());
                ops.adds.push(data);
            }
        }
    }

    if let Some(validator) = validator {
        for data in &ops.adds {
            let key = get_path(data, comparison_key)
                .map(crate::document::key_string)
                .unwrap_or_default();
            validator.validate_add(collection, &key, data)?;
        }
    }

    Ok(ops)
}

/// Execute resolved operations: adds, then updates, then deletes.
pub async fn apply_collection(
    store: &dyn DocumentStore,
    subject: SubjectId,
    collection: &str,
    ops: CollectionOps,
) -> Result<(), StoreError> {
    if !ops.adds.is_empty() {
        store.create_items(subject, collection, ops.adds).await?;
    }
    if !ops.updates.is_empty() {
        store.update_items(subject, collection, ops.updates).await?;
    }
    if !ops.deletes.is_empty() {
        store.delete_items(subject, collection, ops.deletes).await?;
    }
    Ok(())
}
