//! Persisted documents
//!
//! A Subject is the root document: scalar/object fields plus named embedded
//! collections. An Instance is a placement that references exactly one
//! Subject. Both are reached through the `DocumentStore` collaborator.

mod file_store;
mod model;
mod patch;
mod store;

pub use file_store::JsonFileStore;
pub(crate) use model::key_string;
pub use model::{
    EmbeddedItem, Fields, Instance, InstanceId, ItemId, OwnershipLevel, PeerId, SceneId, Subject,
    SubjectId,
};
pub use patch::{get_path, is_beneath, FieldChange, FieldPatch};
pub(crate) use patch::{join, remove_path, set_path};
pub use store::{DocumentStore, MemoryStore};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Subject not found: {0}")]
    SubjectNotFound(Uuid),

    #[error("Instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("Embedded item {item} not found in collection {collection}")]
    ItemNotFound { collection: String, item: Uuid },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),
}
