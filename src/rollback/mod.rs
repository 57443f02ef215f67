//! Persisted rollback stacks
//!
//! Each Subject carries its own stack of inverse deltas. Entries are pushed
//! with the writes of the mutation they undo and popped on revert.

mod entry;
mod stack;

pub use entry::RollbackEntry;
pub use stack::{remove_and_rebase, RollbackStack};

use thiserror::Error;

use crate::document::StoreError;

#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("A rollback entry named {0:?} already exists")]
    DuplicateName(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt rollback stack: {0}")]
    Corrupt(String),
}
