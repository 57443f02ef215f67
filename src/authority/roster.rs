use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::PeerId;

/// Standing of a peer in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    Regular,
    /// Administrative peer; may act as authority for anything
    Privileged,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub role: PeerRole,
    pub connected: bool,
}

/// Known peers and their connection state.
///
/// Iteration is ordered by peer id, so every peer holding the same roster
/// sees the same order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerRoster {
    peers: BTreeMap<PeerId, PeerInfo>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a connected peer.
    pub fn with_peer(mut self, id: PeerId, name: impl Into<String>, role: PeerRole) -> Self {
        self.insert(id, name, role);
        self
    }

    /// Add or replace a peer, marking it connected.
    pub fn insert(&mut self, id: PeerId, name: impl Into<String>, role: PeerRole) {
        self.peers.insert(
            id,
            PeerInfo {
                id,
                name: name.into(),
                role,
                connected: true,
            },
        );
    }

    /// Mark a known peer connected. Returns false for unknown peers.
    pub fn connect(&mut self, id: &PeerId) -> bool {
        self.set_connected(id, true)
    }

    pub fn disconnect(&mut self, id: &PeerId) -> bool {
        self.set_connected(id, false)
    }

    fn set_connected(&mut self, id: &PeerId, connected: bool) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.connected = connected;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.peers.get(id).map_or(false, |p| p.connected)
    }

    /// Connected peers in roster order.
    pub fn connected(&self) -> impl Iterator<Item = &PeerInfo> + Clone {
        self.peers.values().filter(|p| p.connected)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
