//! Request/response exchange with the elected authority

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;

use super::collaborators::{ChangeSet, ConfirmationUi};
use super::election::elect_authority;
use super::roster::PeerRoster;
use super::AuthorityError;
use crate::config::{WorkflowOverrides, WorkflowSettings};
use crate::document::{InstanceId, PeerId, SceneId, Subject};
use crate::events::{Event, EventBus, EventKind};
use crate::protocol::{send_message, Message, Transport};
use crate::rollback::RollbackEntry;

/// Answer from the authority to a forwarded request.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteResponse {
    pub responder: PeerId,
    pub accepted: bool,
    /// The entry the authority pushed or popped, when it sent one
    pub entry: Option<RollbackEntry>,
}

impl RemoteResponse {
    pub fn from_event(event: &Event) -> Self {
        let entry = if event.data.is_null() {
            None
        } else {
            match serde_json::from_value(event.data.clone()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Ignoring malformed payload in response from {}: {}", event.user_id, e);
                    None
                }
            }
        };
        Self {
            responder: event.user_id,
            accepted: event.accepted.unwrap_or(false),
            entry,
        }
    }

    /// A rejection recorded without contacting the authority.
    pub fn rejected(responder: PeerId) -> Self {
        Self {
            responder,
            accepted: false,
            entry: None,
        }
    }
}

/// Routes work to the single peer allowed to commit it.
pub struct RemoteAuthority {
    local: PeerId,
    roster: Arc<RwLock<PeerRoster>>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    confirm: Arc<dyn ConfirmationUi>,
    settings: WorkflowSettings,
}

impl RemoteAuthority {
    pub fn new(
        roster: Arc<RwLock<PeerRoster>>,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        confirm: Arc<dyn ConfirmationUi>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            local: transport.peer_id(),
            roster,
            transport,
            bus,
            confirm,
            settings,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn roster(&self) -> Arc<RwLock<PeerRoster>> {
        Arc::clone(&self.roster)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The peer currently responsible for `subject`.
    pub fn authority_for(&self, subject: &Subject) -> Result<Option<PeerId>, AuthorityError> {
        let roster = self
            .roster
            .read()
            .map_err(|e| AuthorityError::LockPoisoned(e.to_string()))?;
        Ok(elect_authority(&roster, &subject.ownership))
    }

    /// Authority for `subject`, failing if nobody qualifies.
    pub fn require_authority(
        &self,
        subject: &Subject,
        instance: InstanceId,
    ) -> Result<PeerId, AuthorityError> {
        self.authority_for(subject)?
            .ok_or(AuthorityError::OwnerUnavailable(instance))
    }

    pub fn is_local_authority(&self, subject: &Subject) -> bool {
        matches!(self.authority_for(subject), Ok(Some(peer)) if peer == self.local)
    }

    /// Broadcast a message to every peer, this one included.
    pub async fn broadcast(&self, message: &Message) -> Result<(), AuthorityError> {
        send_message(self.transport.as_ref(), message).await?;
        Ok(())
    }

    /// Broadcast an event. Every peer runs it on its own bus on receipt.
    pub async fn emit(&self, event: Event) -> Result<(), AuthorityError> {
        self.broadcast(&Message::Event(event)).await
    }

    /// Broadcast `message` and wait for the response correlated on
    /// `(instance, name)`.
    ///
    /// Without a configured response timeout this waits for as long as it
    /// takes; a vanished authority leaves it pending.
    pub async fn request(
        &self,
        message: Message,
        response_kind: EventKind,
        instance: InstanceId,
        name: &str,
    ) -> Result<RemoteResponse, AuthorityError> {
        let (tx, rx) = oneshot::channel::<Event>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let correlation = name.to_string();

        let trigger = self.bus.trigger_when(
            response_kind,
            move |event| event.correlates(instance, &correlation),
            move |event| {
                let slot = Arc::clone(&slot);
                async move {
                    let tx = slot.lock().ok().and_then(|mut slot| slot.take());
                    if let Some(tx) = tx {
                        let _ = tx.send(event);
                    }
                    Ok(())
                }
            },
        );

        if let Err(e) = self.broadcast(&message).await {
            self.bus.remove(trigger);
            return Err(e);
        }

        let event = match self.settings.response_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.bus.remove(trigger);
                    log::warn!("No response for {name} on {instance} after {limit:?}");
                    return Err(AuthorityError::ResponseTimeout {
                        instance,
                        name: name.to_string(),
                    });
                }
            },
            None => rx.await,
        }
        .map_err(|_| AuthorityError::ResponseLost {
            instance,
            name: name.to_string(),
        })?;

        Ok(RemoteResponse::from_event(&event))
    }

    /// Accept or reject a change arriving from another peer.
    ///
    /// Auto-accept resolves without a prompt and, unless notices are
    /// suppressed, tells the local user what was applied.
    pub async fn decide(&self, change: &ChangeSet, overrides: &WorkflowOverrides) -> bool {
        if self.settings.auto_accept(overrides) {
            if !self.settings.suppress_notice(overrides) {
                self.confirm.notify(change).await;
            }
            return true;
        }
        self.confirm.present(change).await == Some(true)
    }

    /// Send the correlated response for a handled request.
    pub async fn respond(
        &self,
        kind: EventKind,
        scene: SceneId,
        instance: InstanceId,
        name: &str,
        accepted: bool,
        entry: Option<&RollbackEntry>,
    ) -> Result<(), AuthorityError> {
        let data = match entry {
            Some(entry) => serde_json::to_value(entry)
                .map_err(|e| AuthorityError::SerializationError(e.to_string()))?,
            None => serde_json::Value::Null,
        };
        let event = Event::new(kind, scene, self.local)
            .with_instance(instance)
            .with_mutation(name)
            .with_accepted(accepted)
            .with_data(data);
        self.emit(event).await
    }
}
