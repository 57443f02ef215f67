//! Persistence collaborator and its in-memory implementation

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::model::{Fields, Instance, InstanceId, ItemId, Subject, SubjectId};
use super::patch::FieldPatch;
use super::StoreError;

/// Storage for Subjects, Instances and their flags.
///
/// Every call is a suspension point. Flags are array-valued named fields on a
/// Subject and are always written wholesale.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn subject(&self, id: SubjectId) -> Result<Subject, StoreError>;

    async fn instance(&self, id: InstanceId) -> Result<Instance, StoreError>;

    async fn update_subject(&self, id: SubjectId, patch: &FieldPatch) -> Result<(), StoreError>;

    async fn update_instance(&self, id: InstanceId, patch: &FieldPatch) -> Result<(), StoreError>;

    async fn delete_instance(&self, id: InstanceId) -> Result<(), StoreError>;

    /// Create items in a collection, returning their new persistent ids.
    async fn create_items(
        &self,
        subject: SubjectId,
        collection: &str,
        items: Vec<Fields>,
    ) -> Result<Vec<ItemId>, StoreError>;

    async fn update_items(
        &self,
        subject: SubjectId,
        collection: &str,
        updates: Vec<(ItemId, FieldPatch)>,
    ) -> Result<(), StoreError>;

    async fn delete_items(
        &self,
        subject: SubjectId,
        collection: &str,
        ids: Vec<ItemId>,
    ) -> Result<(), StoreError>;

    async fn get_flag(&self, subject: SubjectId, key: &str) -> Result<Option<Vec<Value>>, StoreError>;

    async fn set_flag(&self, subject: SubjectId, key: &str, entries: Vec<Value>) -> Result<(), StoreError>;
}

/// In-memory document store shared by every peer in a process.
#[derive(Default)]
pub struct MemoryStore {
    subjects: RwLock<HashMap<SubjectId, Subject>>,
    instances: RwLock<HashMap<InstanceId, Instance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subject(&self, subject: Subject) -> Result<(), StoreError> {
        let mut subjects = self
            .subjects
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        subjects.insert(subject.id, subject);
        Ok(())
    }

    pub fn insert_instance(&self, instance: Instance) -> Result<(), StoreError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        instances.insert(instance.id, instance);
        Ok(())
    }

    pub(crate) fn read_subject(&self, id: SubjectId) -> Result<Subject, StoreError> {
        self.subjects
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .get(&id)
            .cloned()
            .ok_or(StoreError::SubjectNotFound(id))
    }

    pub(crate) fn read_instance(&self, id: InstanceId) -> Result<Option<Instance>, StoreError> {
        Ok(self
            .instances
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .get(&id)
            .cloned())
    }

    pub(crate) fn all_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        Ok(self
            .subjects
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .values()
            .cloned()
            .collect())
    }

    pub(crate) fn all_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self
            .instances
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .values()
            .cloned()
            .collect())
    }

    /// Run `f` against a Subject under the write lock.
    pub(crate) fn modify_subject<T>(
        &self,
        id: SubjectId,
        f: impl FnOnce(&mut Subject) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut subjects = self
            .subjects
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let subject = subjects.get_mut(&id).ok_or(StoreError::SubjectNotFound(id))?;
        f(subject)
    }

    pub(crate) fn modify_instance<T>(
        &self,
        id: InstanceId,
        f: impl FnOnce(&mut Instance) -> T,
    ) -> Result<T, StoreError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let instance = instances.get_mut(&id).ok_or(StoreError::InstanceNotFound(id))?;
        Ok(f(instance))
    }

    pub(crate) fn remove_instance(&self, id: InstanceId) -> Result<bool, StoreError> {
        Ok(self
            .instances
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .remove(&id)
            .is_some())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subject(&self, id: SubjectId) -> Result<Subject, StoreError> {
        self.read_subject(id)
    }

    async fn instance(&self, id: InstanceId) -> Result<Instance, StoreError> {
        self.read_instance(id)?.ok_or(StoreError::InstanceNotFound(id))
    }

    async fn update_subject(&self, id: SubjectId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.modify_subject(id, |subject| {
            patch.apply_to(&mut subject.fields);
            Ok(())
        })
    }

    async fn update_instance(&self, id: InstanceId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.modify_instance(id, |instance| patch.apply_to(&mut instance.fields))
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), StoreError> {
        if self.remove_instance(id)? {
            Ok(())
        } else {
            Err(StoreError::InstanceNotFound(id))
        }
    }

    async fn create_items(
        &self,
        subject: SubjectId,
        collection: &str,
        items: Vec<Fields>,
    ) -> Result<Vec<ItemId>, StoreError> {
        self.modify_subject(subject, |s| Ok(s.create_items(collection, items)))
    }

    async fn update_items(
        &self,
        subject: SubjectId,
        collection: &str,
        updates: Vec<(ItemId, FieldPatch)>,
    ) -> Result<(), StoreError> {
        self.modify_subject(subject, |s| s.update_items(collection, &updates))
    }

    async fn delete_items(
        &self,
        subject: SubjectId,
        collection: &str,
        ids: Vec<ItemId>,
    ) -> Result<(), StoreError> {
        self.modify_subject(subject, |s| {
            s.delete_items(collection, &ids);
            Ok(())
        })
    }

    async fn get_flag(&self, subject: SubjectId, key: &str) -> Result<Option<Vec<Value>>, StoreError> {
        Ok(self.read_subject(subject)?.flags.get(key).cloned())
    }

    async fn set_flag(&self, subject: SubjectId, key: &str, entries: Vec<Value>) -> Result<(), StoreError> {
        self.modify_subject(subject, |s| {
            s.flags.insert(key.to_string(), entries);
            Ok(())
        })
    }
}
