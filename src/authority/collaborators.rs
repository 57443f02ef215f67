//! Confirmation UI and permission collaborators

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::diff::Shorthand;
use crate::document::{InstanceId, PeerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Mutate,
    Revert,
}

/// A pending remote change, as presented to the authority's user.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet {
    pub kind: ChangeKind,
    pub instance_id: InstanceId,
    pub subject_name: String,
    pub requester: PeerId,
    pub mutation: String,
    pub description: Option<String>,
    pub shorthand: Shorthand,
}

/// Presents pending changes to a user.
#[async_trait]
pub trait ConfirmationUi: Send + Sync {
    /// `Some(true)` accepts. Rejection and dismissal (`None`) both reject.
    async fn present(&self, change: &ChangeSet) -> Option<bool>;

    /// Tell the user about a change that was accepted without a prompt.
    async fn notify(&self, change: &ChangeSet) {
        log::info!(
            "Applied {:?} {} on {} from {}",
            change.kind,
            change.mutation,
            change.subject_name,
            change.requester
        );
    }
}

/// Answers every prompt the same way and counts prompts and notices.
#[derive(Debug, Default)]
pub struct AutoAnswer {
    answer: Option<bool>,
    prompts: AtomicUsize,
    notices: AtomicUsize,
}

impl AutoAnswer {
    pub fn accept() -> Self {
        Self::answering(Some(true))
    }

    pub fn reject() -> Self {
        Self::answering(Some(false))
    }

    /// Behave like a user closing the prompt.
    pub fn dismiss() -> Self {
        Self::answering(None)
    }

    fn answering(answer: Option<bool>) -> Self {
        Self {
            answer,
            ..Default::default()
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> usize {
        self.notices.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationUi for AutoAnswer {
    async fn present(&self, change: &ChangeSet) -> Option<bool> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        log::debug!("Prompted for {} -> {:?}", change.mutation, self.answer);
        self.answer
    }

    async fn notify(&self, _change: &ChangeSet) {
        self.notices.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capabilities a mutation may require of its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Change a Subject's own fields
    EditSubject,
    /// Change a placement
    EditPlacement,
    /// Add, change or remove embedded items
    EditEmbedded,
    /// Undo a stored mutation
    Revert,
    /// Remove a placement
    Dismiss,
}

/// Decides which capabilities a peer lacks.
pub trait PermissionCheck: Send + Sync {
    /// Required capabilities the peer is missing. Empty means authorized.
    fn check(&self, peer: PeerId, required: &[Capability]) -> Vec<Capability>;
}

/// Grants everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn check(&self, _peer: PeerId, _required: &[Capability]) -> Vec<Capability> {
        Vec::new()
    }
}

/// Explicit per-peer grants. Unknown peers hold nothing.
#[derive(Debug, Default)]
pub struct CapabilityTable {
    grants: RwLock<HashMap<PeerId, HashSet<Capability>>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, peer: PeerId, capabilities: &[Capability]) {
        if let Ok(mut grants) = self.grants.write() {
            grants.entry(peer).or_default().extend(capabilities.iter().copied());
        }
    }

    pub fn revoke(&self, peer: PeerId, capability: Capability) {
        if let Ok(mut grants) = self.grants.write() {
            if let Some(held) = grants.get_mut(&peer) {
                held.remove(&capability);
            }
        }
    }
}

impl PermissionCheck for CapabilityTable {
    fn check(&self, peer: PeerId, required: &[Capability]) -> Vec<Capability> {
        let grants = match self.grants.read() {
            Ok(grants) => grants,
            Err(_) => return required.to_vec(),
        };
        let held = grants.get(&peer);
        required
            .iter()
            .filter(|cap| !held.map_or(false, |held| held.contains(*cap)))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_capability_table_reports_missing() {
        let table = CapabilityTable::new();
        let peer = Uuid::new_v4();
        table.grant(peer, &[Capability::EditSubject, Capability::Revert]);

        let missing = table.check(peer, &[Capability::EditSubject, Capability::EditEmbedded]);
        assert_eq!(missing, vec![Capability::EditEmbedded]);

        table.revoke(peer, Capability::EditSubject);
        assert_eq!(
            table.check(peer, &[Capability::EditSubject]),
            vec![Capability::EditSubject]
        );
        assert_eq!(table.check(Uuid::new_v4(), &[Capability::Dismiss]).len(), 1);
    }

    #[tokio::test]
    async fn test_auto_answer_counts_prompts() {
        let ui = AutoAnswer::dismiss();
        let change = ChangeSet {
            kind: ChangeKind::Mutate,
            instance_id: Uuid::new_v4(),
            subject_name: "Goblin".into(),
            requester: Uuid::new_v4(),
            mutation: "heal".into(),
            description: None,
            shorthand: Shorthand::new(),
        };

        assert_eq!(ui.present(&change).await, None);
        ui.notify(&change).await;
        assert_eq!(ui.prompts(), 1);
        assert_eq!(ui.notices(), 1);
        assert!(AllowAll.check(Uuid::new_v4(), &[Capability::Dismiss]).is_empty());
    }
}
