// Steward - authority-routed reversible edits for shared documents

pub mod authority;
pub mod config;
pub mod diff;
pub mod document;
pub mod engine;
pub mod events;
pub mod node;
pub mod protocol;
pub mod queue;
pub mod rollback;

pub use authority::{PeerRole, PeerRoster, RemoteAuthority};
pub use config::{StewardConfig, WorkflowOverrides, WorkflowSettings};
pub use diff::{EmbeddedChange, Shorthand};
pub use document::{DocumentStore, FieldPatch, Instance, MemoryStore, Subject};
pub use engine::{MutateOptions, MutationCallbacks, MutationEngine, MutationError, MutationOutcome};
pub use events::{Event, EventBus, EventKind};
pub use node::Node;
pub use queue::UpdateQueue;
pub use rollback::{RollbackEntry, RollbackStack};
