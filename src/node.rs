//! One peer: a mutation engine wired to a transport
//!
//! A `Node` owns the receive loop. Every frame, the node's own included,
//! arrives through the transport and is dispatched from one place:
//! events go to the local bus, requests to the engine's handlers.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::authority::{
    AllowAll, AutoAnswer, ConfirmationUi, PeerRole, PeerRoster, PermissionCheck, RemoteAuthority,
};
use crate::config::WorkflowSettings;
use crate::diff::Validators;
use crate::document::{DocumentStore, PeerId, SceneId};
use crate::engine::MutationEngine;
use crate::events::{Event, EventBus, EventKind};
use crate::protocol::{Message, Notice, Transport};
use crate::queue::UpdateQueue;
use crate::MutationError;

pub struct NodeBuilder {
    transport: Arc<dyn Transport>,
    store: Arc<dyn DocumentStore>,
    roster: Option<PeerRoster>,
    confirm: Arc<dyn ConfirmationUi>,
    permissions: Arc<dyn PermissionCheck>,
    settings: WorkflowSettings,
    validators: Validators,
    bus: EventBus,
}

impl NodeBuilder {
    /// Starts from the roster that will decide authority. Without one the
    /// node knows only itself, as a regular peer.
    pub fn with_roster(mut self, roster: PeerRoster) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_confirmation(mut self, confirm: Arc<dyn ConfirmationUi>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionCheck>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn build(self) -> Node {
        let local = self.transport.peer_id();
        let roster = self
            .roster
            .unwrap_or_else(|| PeerRoster::new().with_peer(local, "local", PeerRole::Regular));
        let queue = UpdateQueue::new(self.settings.drain_order);

        let authority = Arc::new(RemoteAuthority::new(
            Arc::new(RwLock::new(roster)),
            Arc::clone(&self.transport),
            self.bus,
            self.confirm,
            self.settings,
        ));
        let engine = MutationEngine::new(self.store, queue, authority, self.permissions)
            .with_validators(self.validators);

        let (shutdown_tx, _) = broadcast::channel(1);
        Node {
            engine: Arc::new(engine),
            transport: self.transport,
            shutdown_tx,
        }
    }
}

pub struct Node {
    engine: Arc<MutationEngine>,
    transport: Arc<dyn Transport>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Node {
    pub fn builder(transport: Arc<dyn Transport>, store: Arc<dyn DocumentStore>) -> NodeBuilder {
        NodeBuilder {
            transport,
            store,
            roster: None,
            confirm: Arc::new(AutoAnswer::dismiss()),
            permissions: Arc::new(AllowAll),
            settings: WorkflowSettings::default(),
            validators: Validators::new(),
            bus: EventBus::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.transport.peer_id()
    }

    pub fn engine(&self) -> &Arc<MutationEngine> {
        &self.engine
    }

    pub fn bus(&self) -> &EventBus {
        self.engine.authority().bus()
    }

    pub fn roster(&self) -> Arc<RwLock<PeerRoster>> {
        self.engine.authority().roster()
    }

    pub fn queue(&self) -> &UpdateQueue {
        self.engine.queue()
    }

    /// Start the receive loop.
    ///
    /// Events run on the bus inside the loop, in arrival order, so a
    /// handler that waits on another peer must spawn that work. Requests
    /// are handled on their own tasks.
    pub fn start(&self) {
        let mut rx = self.transport.incoming();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let engine = Arc::clone(&self.engine);
        let peer = self.peer_id();

        tokio::spawn(async move {
            log::debug!("Node {peer} listening");
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(frame) => dispatch(&engine, &frame).await,
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Node {peer} fell behind and dropped {skipped} frames");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::debug!("Node {peer} stopped");
        });
    }

    /// Stop the receive loop. Requests already being handled run to completion.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Broadcast a free-text notice to every peer in the scene.
    pub async fn notice(&self, scene_id: SceneId, text: impl Into<String>) -> Result<(), MutationError> {
        let notice = Notice {
            scene_id,
            user_id: self.peer_id(),
            text: text.into(),
        };
        self.engine.authority().broadcast(&Message::Notice(notice)).await?;
        Ok(())
    }
}

async fn dispatch(engine: &Arc<MutationEngine>, frame: &[u8]) {
    let message = match Message::from_cbor(frame) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Dropping undecodable frame: {e}");
            return;
        }
    };
    log::trace!("Received {} from {}", message.op(), message.user_id());

    match message {
        Message::Event(event) => engine.authority().bus().run(event).await,
        Message::Notice(notice) => {
            let event = Event::new(EventKind::Notice, notice.scene_id, notice.user_id)
                .with_data(serde_json::json!({ "text": notice.text }));
            engine.authority().bus().run(event).await;
        }
        Message::RequestMutate(request) => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let name = request.name.clone();
                if let Err(e) = engine.handle_mutate_request(request).await {
                    log::error!("Mutate request {name} failed: {e}");
                }
            });
        }
        Message::RequestRevert(request) => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let name = request.name.clone();
                if let Err(e) = engine.handle_revert_request(request).await {
                    log::error!("Revert request {name} failed: {e}");
                }
            });
        }
        Message::Dismiss(request) => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let instance = request.instance_id;
                if let Err(e) = engine.handle_dismiss_request(request).await {
                    log::error!("Dismiss of {instance} failed: {e}");
                }
            });
        }
    }
}
