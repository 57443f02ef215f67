use async_trait::async_trait;
use tokio::sync::broadcast;

use super::message::Message;
use super::TransportError;
use crate::document::PeerId;

/// Broadcast medium between peers.
///
/// `broadcast` delivers a frame to every attached peer, the sender
/// included, through the same `incoming` channel remote frames arrive on.
#[async_trait]
pub trait Transport: Send + Sync {
    fn peer_id(&self) -> PeerId;

    async fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    fn incoming(&self) -> broadcast::Receiver<Vec<u8>>;
}

/// Encode and broadcast a message.
pub async fn send_message(transport: &dyn Transport, message: &Message) -> Result<(), TransportError> {
    log::debug!(
        "{} broadcasting {} for scene {}",
        transport.peer_id(),
        message.op(),
        message.scene_id()
    );
    transport.broadcast(message.to_cbor()?).await
}
