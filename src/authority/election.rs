use std::collections::BTreeMap;

use super::roster::{PeerRole, PeerRoster};
use crate::document::{OwnershipLevel, PeerId};

/// Pick the peer responsible for committing writes to a document.
///
/// The first connected regular peer with owner rights wins. Failing that,
/// the first connected privileged peer. `None` if neither is connected.
/// The result depends only on the roster and the ownership map.
pub fn elect_authority(
    roster: &PeerRoster,
    ownership: &BTreeMap<PeerId, OwnershipLevel>,
) -> Option<PeerId> {
    let connected = roster.connected();

    connected
        .clone()
        .find(|peer| {
            peer.role == PeerRole::Regular
                && ownership.get(&peer.id) == Some(&OwnershipLevel::Owner)
        })
        .or_else(|| connected.clone().find(|peer| peer.role == PeerRole::Privileged))
        .map(|peer| peer.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (PeerId, PeerId, PeerId) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_owning_regular_peer_beats_privileged() {
        let (gm, alice, bob) = ids();
        let roster = PeerRoster::new()
            .with_peer(gm, "gm", PeerRole::Privileged)
            .with_peer(alice, "alice", PeerRole::Regular)
            .with_peer(bob, "bob", PeerRole::Regular);
        let ownership = BTreeMap::from([
            (gm, OwnershipLevel::Owner),
            (bob, OwnershipLevel::Owner),
            (alice, OwnershipLevel::Observer),
        ]);

        assert_eq!(elect_authority(&roster, &ownership), Some(bob));
    }

    #[test]
    fn test_falls_back_to_privileged_when_owner_disconnects() {
        let (gm, alice, _) = ids();
        let mut roster = PeerRoster::new()
            .with_peer(gm, "gm", PeerRole::Privileged)
            .with_peer(alice, "alice", PeerRole::Regular);
        let ownership = BTreeMap::from([(alice, OwnershipLevel::Owner)]);

        assert_eq!(elect_authority(&roster, &ownership), Some(alice));
        roster.disconnect(&alice);
        assert_eq!(elect_authority(&roster, &ownership), Some(gm));
        roster.disconnect(&gm);
        assert_eq!(elect_authority(&roster, &ownership), None);
    }

    #[test]
    fn test_non_owning_regular_peers_never_elected() {
        let (alice, bob, _) = ids();
        let roster = PeerRoster::new()
            .with_peer(alice, "alice", PeerRole::Regular)
            .with_peer(bob, "bob", PeerRole::Regular);
        let ownership = BTreeMap::from([(alice, OwnershipLevel::Limited)]);

        assert_eq!(elect_authority(&roster, &ownership), None);
    }

    #[test]
    fn test_election_is_deterministic() {
        let (a, b, c) = ids();
        let roster = PeerRoster::new()
            .with_peer(a, "a", PeerRole::Regular)
            .with_peer(b, "b", PeerRole::Regular)
            .with_peer(c, "c", PeerRole::Privileged);
        let ownership = BTreeMap::from([(a, OwnershipLevel::Owner), (b, OwnershipLevel::Owner)]);

        let first = elect_authority(&roster, &ownership);
        for _ in 0..10 {
            assert_eq!(elect_authority(&roster.clone(), &ownership), first);
        }
        assert_eq!(first, Some(a.min(b)));
    }
}
