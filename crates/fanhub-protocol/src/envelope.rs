//! Frame and envelope shapes exchanged over the WebSocket and the two
//! cross-instance buses.

use serde::{Deserialize, Serialize};

use crate::action::Action;

/// `{"action": ..., "payload": ...}` sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub action: Action,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `"success"` or `"error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// `{"action", "status", "payload", "data", "error"}` sent to a client,
/// either as a direct reply or as a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub action: Action,
    pub status: Status,
    /// Echo of the triggering inbound payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Server-attached result data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundFrame {
    pub fn success(action: Action, payload: serde_json::Value, data: serde_json::Value) -> Self {
        Self {
            action,
            status: Status::Success,
            payload: Some(payload),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(action: Action, message: impl Into<String>) -> Self {
        Self {
            action,
            status: Status::Error,
            payload: None,
            data: None,
            error: Some(message.into()),
        }
    }

    /// An error reply carrying a `retryAfter` (seconds) in `data`, used for
    /// non-fatal rate-limit denials.
    pub fn rate_limited(action: Action, retry_after_secs: u64) -> Self {
        Self {
            action,
            status: Status::Error,
            payload: None,
            data: Some(serde_json::json!({ "retryAfter": retry_after_secs })),
            error: Some("Rate limit exceeded, please slow down".to_string()),
        }
    }
}

/// The envelope carried across a cross-instance bus (pub/sub or durable).
///
/// `_source_id` is attached exactly once, on the first cross-instance
/// egress; ingress handlers drop any envelope whose `source_id` equals the
/// local instance id (see [`Envelope::is_from_instance`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub frame: OutboundFrame,
    #[serde(rename = "_source_id", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(rename = "room_id", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Envelope {
    /// Attach the originating instance id. Must be called exactly once,
    /// at the point of first cross-instance egress.
    pub fn with_source(mut self, instance_id: impl Into<String>) -> Self {
        self.source_id = Some(instance_id.into());
        self
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn is_from_instance(&self, instance_id: &str) -> bool {
        self.source_id.as_deref() == Some(instance_id)
    }
}

impl From<OutboundFrame> for Envelope {
    fn from(frame: OutboundFrame) -> Self {
        Self {
            frame,
            source_id: None,
            room_id: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_self_filter_matches_own_instance() {
        let env = Envelope::from(OutboundFrame::error(Action::TypingIndicator, "x"))
            .with_source("inst-a");
        assert!(env.is_from_instance("inst-a"));
        assert!(!env.is_from_instance("inst-b"));
    }

    #[test]
    fn outbound_frame_serializes_status_lowercase() {
        let frame = OutboundFrame::success(Action::JoinBoard, serde_json::json!({}), serde_json::json!({}));
        let v = serde_json::to_value(&frame).expect("serializable");
        assert_eq!(v["status"], "success");
    }

    #[test]
    fn rate_limited_reply_carries_retry_after() {
        let frame = OutboundFrame::rate_limited(Action::SendRoomChatMessage, 12);
        let v = serde_json::to_value(&frame).expect("serializable");
        assert_eq!(v["data"]["retryAfter"], 12);
    }
}
