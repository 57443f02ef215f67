//! Wire protocol between peers
//!
//! Every frame is one CBOR-encoded `Message`: an `{op, payload}` envelope
//! whose payload always names the scene and the user of record. Frames are
//! broadcast to every peer, the sender included.

mod local;
mod message;
mod transport;

pub use local::{LocalNetwork, LocalTransport};
pub use message::{DismissRequest, Message, MutateRequest, Notice, RevertRequest};
pub use transport::{send_message, Transport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}
