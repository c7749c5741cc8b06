//! Message protocol definitions
//!
//! Room-level messages are a closed enum; the JSON wire frame
//! `{type, content, sender, timestamp}` is produced from them through
//! Serde's `into` conversion. Inbound frames are parsed leniently
//! (unknown fields ignored, `type` defaults to `chat`) so that field
//! tolerance stays at the connection boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender name used for every room-generated message
pub const SYSTEM_SENDER: &str = "system";

/// Wire `type` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameType {
    #[default]
    Chat,
    System,
    UserJoined,
    UserLeft,
    UserList,
    RefreshUserList,
}

/// Client → Server frame
///
/// Any client-supplied `timestamp` is ignored; the room stamps messages
/// itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub kind: FrameType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: String,
}

impl ClientFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Server → Client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// A message flowing through a room
///
/// Every variant carries the time the room accepted it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Frame")]
pub enum Message {
    /// Chat line from a member
    Chat {
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// A member joined
    SystemJoined { name: String, timestamp: DateTime<Utc> },
    /// A member left
    SystemLeft { name: String, timestamp: DateTime<Utc> },
    /// Current member display names, sent to a single session
    UserList {
        members: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    /// Create a chat message
    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Chat {
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a join notification
    pub fn joined(name: impl Into<String>) -> Self {
        Message::SystemJoined {
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a leave notification
    pub fn left(name: impl Into<String>) -> Self {
        Message::SystemLeft {
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a member list reply
    pub fn user_list(members: Vec<String>) -> Self {
        Message::UserList {
            members,
            timestamp: Utc::now(),
        }
    }

    /// Wire type of this message
    pub fn kind(&self) -> FrameType {
        match self {
            Message::Chat { .. } => FrameType::Chat,
            Message::SystemJoined { .. } => FrameType::UserJoined,
            Message::SystemLeft { .. } => FrameType::UserLeft,
            Message::UserList { .. } => FrameType::UserList,
        }
    }

    /// Display name of the sender
    pub fn sender(&self) -> &str {
        match self {
            Message::Chat { sender, .. } => sender,
            _ => SYSTEM_SENDER,
        }
    }

    /// Rendered content
    ///
    /// For `UserList` this is the JSON array of names as a string.
    pub fn content(&self) -> String {
        match self {
            Message::Chat { content, .. } => content.clone(),
            Message::SystemJoined { name, .. } => format!("{} has joined the chat", name),
            Message::SystemLeft { name, .. } => format!("{} has left the chat", name),
            Message::UserList { members, .. } => {
                serde_json::to_string(members).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Chat { timestamp, .. }
            | Message::SystemJoined { timestamp, .. }
            | Message::SystemLeft { timestamp, .. }
            | Message::UserList { timestamp, .. } => *timestamp,
        }
    }

    /// Replace the timestamp
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        match &mut self {
            Message::Chat { timestamp, .. }
            | Message::SystemJoined { timestamp, .. }
            | Message::SystemLeft { timestamp, .. }
            | Message::UserList { timestamp, .. } => *timestamp = at,
        }
        self
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        Frame {
            kind: msg.kind(),
            content: msg.content(),
            sender: msg.sender().to_string(),
            timestamp: msg.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_defaults_to_chat() {
        let frame = ClientFrame::parse(r#"{"content": "hi", "sender": "Alice"}"#).unwrap();
        assert_eq!(frame.kind, FrameType::Chat);
        assert_eq!(frame.sender, "Alice");
        assert_eq!(frame.content, "hi");
    }

    #[test]
    fn test_client_frame_refresh() {
        let frame = ClientFrame::parse(r#"{"type": "refreshUserList"}"#).unwrap();
        assert_eq!(frame.kind, FrameType::RefreshUserList);
        assert!(frame.content.is_empty());
    }

    #[test]
    fn test_client_frame_ignores_timestamp_and_extra_fields() {
        let json = r#"{"type":"chat","content":"x","sender":"A","timestamp":"yesterday","color":"red"}"#;
        assert!(ClientFrame::parse(json).is_ok());
    }

    #[test]
    fn test_client_frame_unknown_type_rejected() {
        assert!(ClientFrame::parse(r#"{"type": "typing"}"#).is_err());
    }

    #[test]
    fn test_chat_serialize() {
        let msg = Message::chat("A", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["sender"], "A");
        assert_eq!(json["content"], "hi");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_system_messages_serialize() {
        let json = serde_json::to_value(Message::joined("A")).unwrap();
        assert_eq!(json["type"], "userJoined");
        assert_eq!(json["sender"], SYSTEM_SENDER);
        assert_eq!(json["content"], "A has joined the chat");

        let json = serde_json::to_value(Message::left("B")).unwrap();
        assert_eq!(json["type"], "userLeft");
        assert_eq!(json["content"], "B has left the chat");
    }

    #[test]
    fn test_user_list_content_is_json_array() {
        let msg = Message::user_list(vec!["A".to_string(), "B".to_string()]);
        let frame = Frame::from(msg);
        assert_eq!(frame.kind, FrameType::UserList);
        let names: Vec<String> = serde_json::from_str(&frame.content).unwrap();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_stamped_overrides_timestamp() {
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let msg = Message::chat("A", "hi").stamped(at);
        assert_eq!(msg.timestamp(), at);
    }
}
