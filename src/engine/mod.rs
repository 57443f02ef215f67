//! Mutation engine
//!
//! Orchestrates a mutation end to end: permission check, delta computation,
//! rollback entry, serialized writes and lifecycle events. Work that belongs
//! to another peer is forwarded to it through `RemoteAuthority`.

mod apply;
mod batch;
mod mutator;
mod options;

pub use apply::{plan_embedded, EmbeddedPlan};
pub use batch::{BatchOutcome, BatchResult};
pub use mutator::{required_capabilities, MutationEngine};
pub use options::{
    DismissOutcome, MutateOptions, MutationCallbacks, MutationOutcome, MutationReport,
    RevertOutcome,
};

use thiserror::Error;
use uuid::Uuid;

use crate::authority::{AuthorityError, Capability};
use crate::document::StoreError;
use crate::protocol::TransportError;
use crate::queue::QueueError;
use crate::rollback::RollbackError;

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("Missing capabilities: {missing:?}")]
    Permission { missing: Vec<Capability> },

    #[error("A mutation named {0:?} already exists on this document")]
    DuplicateName(String),

    #[error("No connected peer can act for instance {0}")]
    OwnerUnavailable(Uuid),

    #[error("No response for {name} on instance {instance}")]
    ResponseTimeout { instance: Uuid, name: String },

    #[error("Response channel for {name} on instance {instance} closed")]
    ResponseLost { instance: Uuid, name: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Corrupt rollback stack: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<RollbackError> for MutationError {
    fn from(e: RollbackError) -> Self {
        match e {
            RollbackError::DuplicateName(name) => MutationError::DuplicateName(name),
            RollbackError::Store(e) => MutationError::Store(e),
            RollbackError::Corrupt(msg) => MutationError::Corrupt(msg),
        }
    }
}

impl From<AuthorityError> for MutationError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::OwnerUnavailable(instance) => MutationError::OwnerUnavailable(instance),
            AuthorityError::ResponseTimeout { instance, name } => {
                MutationError::ResponseTimeout { instance, name }
            }
            AuthorityError::ResponseLost { instance, name } => {
                MutationError::ResponseLost { instance, name }
            }
            AuthorityError::Transport(e) => MutationError::Transport(e),
            AuthorityError::SerializationError(msg) => MutationError::SerializationError(msg),
            AuthorityError::LockPoisoned(msg) => MutationError::LockPoisoned(msg),
        }
    }
}
