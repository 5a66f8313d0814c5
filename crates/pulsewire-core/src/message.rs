//! Message entity carried on the inbound bus

use crate::types::{MessageId, TimeSource, Timestamp};
use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Origin/purpose tag of a message. Consumers use it for display and
/// filtering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Lifecycle announcements (welcome, farewell, link failure)
    System,
    /// Acknowledgement wrapping the caller's own text
    Echo,
    /// Generated reply to a sent command
    Response,
    /// Unsolicited server event
    Notification,
    /// Liveness pulse
    Heartbeat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Echo => "echo",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
            MessageKind::Heartbeat => "heartbeat",
        }
    }

    /// Whether messages of this kind come from the background supervisor
    pub fn is_supervised(&self) -> bool {
        matches!(self, MessageKind::Notification | MessageKind::Heartbeat)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// Immutable record published onto the inbound stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub payload: String,
    pub created_at: Timestamp,
}

impl Message {
    /// Build a message stamped with the given clock
    pub fn new<P: Into<String>>(kind: MessageKind, payload: P, clock: &dyn TimeSource) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            payload: payload.into(),
            created_at: clock.now(),
        }
    }

    pub fn system<P: Into<String>>(payload: P, clock: &dyn TimeSource) -> Self {
        Self::new(MessageKind::System, payload, clock)
    }

    /// Echo acknowledgement for text the caller sent
    pub fn echo(text: &str, clock: &dyn TimeSource) -> Self {
        Self::new(MessageKind::Echo, format!("Echo: {}", text), clock)
    }

    pub fn response<P: Into<String>>(payload: P, clock: &dyn TimeSource) -> Self {
        Self::new(MessageKind::Response, payload, clock)
    }

    pub fn notification<P: Into<String>>(payload: P, clock: &dyn TimeSource) -> Self {
        Self::new(MessageKind::Notification, payload, clock)
    }

    /// Heartbeat carrying its sequence number within the session
    pub fn heartbeat(seq: u64, clock: &dyn TimeSource) -> Self {
        let payload = serde_json::json!({ "type": "heartbeat", "seq": seq }).to_string();
        Self::new(MessageKind::Heartbeat, payload, clock)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} @ {}", self.kind, self.payload, self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemTimeSource;

    #[test]
    fn test_echo_wraps_original_text() {
        let message = Message::echo("hello there", &SystemTimeSource);
        assert_eq!(message.kind, MessageKind::Echo);
        assert!(message.payload.contains("hello there"));
    }

    #[test]
    fn test_heartbeat_payload_is_json() {
        let message = Message::heartbeat(7, &SystemTimeSource);
        let value: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MessageKind::Notification).unwrap();
        assert_eq!(json, "\"notification\"");
        assert!(MessageKind::Heartbeat.is_supervised());
        assert!(!MessageKind::Echo.is_supervised());
    }
}
