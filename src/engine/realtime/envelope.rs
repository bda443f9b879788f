// Wire protocol between operator sessions and the hub. Encoded as JSON; the
// `type` tag selects the variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Request { id: String, resource: String, payload: Value },
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected { id: String, client_id: Uuid },
    Response { id: String, payload: Value },
    Error { id: String, payload: ErrorPayload },
    Event { id: String, payload: EventPayload },
    Heartbeat,
    Lag { id: String, dropped: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

/// The event names §4.8 enumerates, emitted server→client unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    NewMessage,
    MessageDeleted,
    ConversationCreated,
    ConversationUpdated,
    LeadStageChanged,
    MeetingCreated,
    MeetingUpdated,
    MeetingCancelled,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::NewMessage => "new_message",
            EventName::MessageDeleted => "message_deleted",
            EventName::ConversationCreated => "conversation_created",
            EventName::ConversationUpdated => "conversation_updated",
            EventName::LeadStageChanged => "lead_stage_changed",
            EventName::MeetingCreated => "meeting_created",
            EventName::MeetingUpdated => "meeting_updated",
            EventName::MeetingCancelled => "meeting_cancelled",
        }
    }
}

/// Build an `event` frame with a fresh correlation id.
pub fn event_frame(name: EventName, data: Value) -> ServerFrame {
    ServerFrame::Event {
        id: Uuid::new_v4().to_string(),
        payload: EventPayload { event_type: name.as_str().to_string(), data },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_request_frame_round_trips() {
        let frame = ClientFrame::Request {
            id: "1".into(),
            resource: "conversations".into(),
            payload: serde_json::json!({ "action": "get_all" }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        match back {
            ClientFrame::Request { resource, .. } => assert_eq!(resource, "conversations"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn event_frame_tags_type_correctly() {
        let frame = event_frame(EventName::NewMessage, serde_json::json!({ "id": "abc" }));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["payload"]["type"], "new_message");
    }
}
