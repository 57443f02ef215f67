//! In-process broadcast network
//!
//! Every transport attached to a `LocalNetwork` shares one tokio broadcast
//! channel, so each frame reaches all attached peers including its sender.
//! Used by tests and the demo binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::transport::Transport;
use super::TransportError;
use crate::document::PeerId;

/// The shared medium.
pub struct LocalNetwork {
    medium: broadcast::Sender<Vec<u8>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        let (medium, _) = broadcast::channel(256);
        Arc::new(Self { medium })
    }

    /// Attach a peer to this network.
    pub fn attach(self: &Arc<Self>, peer_id: PeerId) -> LocalTransport {
        LocalTransport {
            peer_id,
            network: Arc::clone(self),
            latency: Duration::ZERO,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }
}

pub struct LocalTransport {
    peer_id: PeerId,
    network: Arc<LocalNetwork>,
    /// Delay applied to each broadcast. Uses tokio time, so paused clocks
    /// advance instantly in tests.
    latency: Duration,
    connected: Arc<AtomicBool>,
}

impl LocalTransport {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Stop sending. Frames already in flight are still delivered.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn broadcast(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        // No subscribers just means nobody is listening yet
        let _ = self.network.medium.send(frame);
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<Vec<u8>> {
        self.network.medium.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_reaches_sender_and_peers() {
        let network = LocalNetwork::new();
        let a = network.attach(Uuid::new_v4());
        let b = network.attach(Uuid::new_v4());
        let mut a_rx = a.incoming();
        let mut b_rx = b.incoming();

        a.broadcast(vec![1, 2, 3]).await.unwrap();
        assert_eq!(a_rx.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(b_rx.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_disconnected_transport_refuses_to_send() {
        let network = LocalNetwork::new();
        let a = network.attach(Uuid::new_v4());
        a.disconnect();
        assert!(matches!(a.broadcast(vec![0]).await, Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_delivery() {
        let network = LocalNetwork::new();
        let a = network.attach(Uuid::new_v4()).with_latency(Duration::from_millis(50));
        let mut rx = a.incoming();

        let start = tokio::time::Instant::now();
        a.broadcast(vec![9]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![9]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_broadcast_without_listeners_is_ok() {
        let network = LocalNetwork::new();
        let a = network.attach(Uuid::new_v4());
        a.broadcast(vec![0]).await.unwrap();
    }
}
