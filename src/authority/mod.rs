//! Peer authority
//!
//! Exactly one connected peer commits writes for a given document. The
//! choice is a pure function of the connected roster and the document's
//! ownership map, so every peer agrees without negotiating. Other peers
//! forward their requests to it and wait for a correlated response.

mod collaborators;
mod election;
mod remote;
mod roster;

pub use collaborators::{
    AllowAll, AutoAnswer, Capability, CapabilityTable, ChangeKind, ChangeSet, ConfirmationUi,
    PermissionCheck,
};
pub use election::elect_authority;
pub use remote::{RemoteAuthority, RemoteResponse};
pub use roster::{PeerInfo, PeerRole, PeerRoster};

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::TransportError;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("No connected peer can act for instance {0}")]
    OwnerUnavailable(Uuid),

    #[error("No response for {name} on instance {instance}")]
    ResponseTimeout { instance: Uuid, name: String },

    #[error("Response channel for {name} on instance {instance} closed")]
    ResponseLost { instance: Uuid, name: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Roster lock poisoned: {0}")]
    LockPoisoned(String),
}
