use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{InstanceId, PeerId, SceneId};

/// Name an event is published under
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Mutate,
    Revert,
    MutateResponse,
    RevertResponse,
    Dismiss,
    Notice,
    Custom(String),
}

/// Lifecycle notification carried on the bus and over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub scene_id: SceneId,
    pub user_id: PeerId,
    pub instance_id: Option<InstanceId>,
    /// Mutation name, for correlating responses
    pub mutation: Option<String>,
    pub accepted: Option<bool>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(kind: EventKind, scene_id: SceneId, user_id: PeerId) -> Self {
        Self {
            kind,
            scene_id,
            user_id,
            instance_id: None,
            mutation: None,
            accepted: None,
            data: Value::Null,
        }
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_mutation(mut self, name: impl Into<String>) -> Self {
        self.mutation = Some(name.into());
        self
    }

    pub fn with_accepted(mut self, accepted: bool) -> Self {
        self.accepted = Some(accepted);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Whether this event answers the mutation `name` on `instance`.
    pub fn correlates(&self, instance: InstanceId, name: &str) -> bool {
        self.instance_id == Some(instance) && self.mutation.as_deref() == Some(name)
    }
}
