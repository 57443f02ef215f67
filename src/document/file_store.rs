//! On-disk persistence for documents
//!
//! Stores Subjects as `subjects/{id}.json` and Instances as
//! `instances/{id}.json`. Reads come from an in-memory cache; every write is
//! written through to disk before returning.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::model::{Fields, Instance, InstanceId, ItemId, Subject, SubjectId};
use super::patch::FieldPatch;
use super::store::{DocumentStore, MemoryStore};
use super::StoreError;

const SUBJECT_DIR: &str = "subjects";
const INSTANCE_DIR: &str = "instances";

fn write_document<T: Serialize>(dir: &Path, id: Uuid, document: &T) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::IoError(e.to_string()))?;

    let path = dir.join(format!("{}.json", id));
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    std::fs::write(path, json).map_err(|e| StoreError::IoError(e.to_string()))?;
    Ok(())
}

fn read_documents<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut documents = Vec::new();
    if !dir.exists() {
        return Ok(documents);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::IoError(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
        let path = entry.path();

        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            let data = std::fs::read(&path).map_err(|e| StoreError::IoError(e.to_string()))?;
            let document = serde_json::from_slice(&data)
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            documents.push(document);
        }
    }
    Ok(documents)
}

/// Directory-backed document store.
pub struct JsonFileStore {
    storage_path: PathBuf,
    cache: MemoryStore,
}

impl JsonFileStore {
    /// Open a store rooted at `storage_path`, loading any documents already there.
    pub fn open(storage_path: &Path) -> Result<Self, StoreError> {
        let cache = MemoryStore::new();
        for subject in read_documents::<Subject>(&storage_path.join(SUBJECT_DIR))? {
            cache.insert_subject(subject)?;
        }
        for instance in read_documents::<Instance>(&storage_path.join(INSTANCE_DIR))? {
            cache.insert_instance(instance)?;
        }
        log::debug!("Opened document store at {}", storage_path.display());

        Ok(Self {
            storage_path: storage_path.to_path_buf(),
            cache,
        })
    }

    pub fn insert_subject(&self, subject: Subject) -> Result<(), StoreError> {
        self.save_subject(&subject)?;
        self.cache.insert_subject(subject)
    }

    pub fn insert_instance(&self, instance: Instance) -> Result<(), StoreError> {
        self.save_instance(&instance)?;
        self.cache.insert_instance(instance)
    }

    pub fn subject_count(&self) -> Result<usize, StoreError> {
        Ok(self.cache.all_subjects()?.len())
    }

    pub fn instance_count(&self) -> Result<usize, StoreError> {
        Ok(self.cache.all_instances()?.len())
    }

    fn save_subject(&self, subject: &Subject) -> Result<(), StoreError> {
        write_document(&self.storage_path.join(SUBJECT_DIR), subject.id, subject)
    }

    fn save_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        write_document(&self.storage_path.join(INSTANCE_DIR), instance.id, instance)
    }

    fn flush_subject(&self, id: SubjectId) -> Result<(), StoreError> {
        self.save_subject(&self.cache.read_subject(id)?)
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn subject(&self, id: SubjectId) -> Result<Subject, StoreError> {
        self.cache.subject(id).await
    }

    async fn instance(&self, id: InstanceId) -> Result<Instance, StoreError> {
        self.cache.instance(id).await
    }

    async fn update_subject(&self, id: SubjectId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.cache.update_subject(id, patch).await?;
        self.flush_subject(id)
    }

    async fn update_instance(&self, id: InstanceId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.cache.update_instance(id, patch).await?;
        let instance = self.cache.instance(id).await?;
        self.save_instance(&instance)
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), StoreError> {
        self.cache.delete_instance(id).await?;
        let path = self
            .storage_path
            .join(INSTANCE_DIR)
            .join(format!("{}.json", id));
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    async fn create_items(
        &self,
        subject: SubjectId,
        collection: &str,
        items: Vec<Fields>,
    ) -> Result<Vec<ItemId>, StoreError> {
        let ids = self.cache.create_items(subject, collection, items).await?;
        self.flush_subject(subject)?;
        Ok(ids)
    }

    async fn update_items(
        &self,
        subject: SubjectId,
        collection: &str,
        updates: Vec<(ItemId, FieldPatch)>,
    ) -> Result<(), StoreError> {
        self.cache.update_items(subject, collection, updates).await?;
        self.flush_subject(subject)
    }

    async fn delete_items(
        &self,
        subject: SubjectId,
        collection: &str,
        ids: Vec<ItemId>,
    ) -> Result<(), StoreError> {
        self.cache.delete_items(subject, collection, ids).await?;
        self.flush_subject(subject)
    }

    async fn get_flag(&self, subject: SubjectId, key: &str) -> Result<Option<Vec<Value>>, StoreError> {
        self.cache.get_flag(subject, key).await
    }

    async fn set_flag(&self, subject: SubjectId, key: &str, entries: Vec<Value>) -> Result<(), StoreError> {
        self.cache.set_flag(subject, key, entries).await?;
        self.flush_subject(subject)
    }
}
