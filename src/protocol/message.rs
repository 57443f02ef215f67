use serde::{Deserialize, Serialize};

use super::TransportError;
use crate::config::WorkflowOverrides;
use crate::diff::Shorthand;
use crate::engine::MutateOptions;
use crate::events::Event;
use crate::document::{InstanceId, PeerId, SceneId};

/// Ask the authority to remove a placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DismissRequest {
    pub scene_id: SceneId,
    pub user_id: PeerId,
    pub instance_id: InstanceId,
}

/// Ask the authority to commit a mutation computed by the requester.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutateRequest {
    pub scene_id: SceneId,
    pub user_id: PeerId,
    pub instance_id: InstanceId,
    /// Correlates the response
    pub name: String,
    pub shorthand: Shorthand,
    /// Carries the requester's precomputed delta
    pub options: MutateOptions,
}

/// Ask the authority to revert a named entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevertRequest {
    pub scene_id: SceneId,
    pub user_id: PeerId,
    pub instance_id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub overrides: WorkflowOverrides,
}

/// Free-text announcement shown to every peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub scene_id: SceneId,
    pub user_id: PeerId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Dismiss(DismissRequest),
    Event(Event),
    RequestMutate(MutateRequest),
    RequestRevert(RevertRequest),
    Notice(Notice),
}

impl Message {
    /// Serialize to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_cbor(data: &[u8]) -> Result<Self, TransportError> {
        ciborium::from_reader(data).map_err(|e| TransportError::SerializationError(e.to_string()))
    }

    pub fn scene_id(&self) -> SceneId {
        match self {
            Message::Dismiss(m) => m.scene_id,
            Message::Event(m) => m.scene_id,
            Message::RequestMutate(m) => m.scene_id,
            Message::RequestRevert(m) => m.scene_id,
            Message::Notice(m) => m.scene_id,
        }
    }

    pub fn user_id(&self) -> PeerId {
        match self {
            Message::Dismiss(m) => m.user_id,
            Message::Event(m) => m.user_id,
            Message::RequestMutate(m) => m.user_id,
            Message::RequestRevert(m) => m.user_id,
            Message::Notice(m) => m.user_id,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Message::Dismiss(_) => "DISMISS",
            Message::Event(_) => "EVENT",
            Message::RequestMutate(_) => "REQUEST_MUTATE",
            Message::RequestRevert(_) => "REQUEST_REVERT",
            Message::Notice(_) => "NOTICE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldPatch, Fields};
    use crate::events::EventKind;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_envelope_uses_op_and_payload() {
        let message = Message::Notice(Notice {
            scene_id: Uuid::nil(),
            user_id: Uuid::nil(),
            text: "Initiative!".into(),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["op"], json!("NOTICE"));
        assert_eq!(value["payload"]["text"], json!("Initiative!"));
        assert_eq!(value["payload"]["scene_id"], json!(Uuid::nil().to_string()));
    }

    #[test]
    fn test_request_survives_cbor() {
        let mut data = Fields::new();
        data.insert("type".into(), json!("gear"));
        let shorthand = Shorthand::new()
            .set("hp", 15)
            .update("items", "Rope", FieldPatch::new().remove("knots"))
            .create("items", "Torch", data)
            .delete("items", "Potion");

        let message = Message::RequestMutate(MutateRequest {
            scene_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            instance_id: Uuid::new_v4(),
            name: "heal".into(),
            shorthand: shorthand.clone(),
            options: MutateOptions::named("heal").with_delta(Shorthand::new().set("hp", 10)),
        });

        let decoded = Message::from_cbor(&message.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.op(), "REQUEST_MUTATE");
    }

    #[test]
    fn test_event_survives_cbor() {
        let event = Event::new(EventKind::MutateResponse, Uuid::new_v4(), Uuid::new_v4())
            .with_instance(Uuid::new_v4())
            .with_mutation("heal")
            .with_accepted(false);
        let message = Message::Event(event);

        assert_eq!(Message::from_cbor(&message.to_cbor().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Message::from_cbor(&[0xff, 0x00, 0x13]),
            Err(TransportError::SerializationError(_))
        ));
    }
}
