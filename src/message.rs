//! Wire protocol definitions
//!
//! JSON-based bidirectional protocol. Inbound frames carry an action string
//! plus content; the action resolves through the closed [`Action`] enum so
//! dispatch is exhaustive and unknown values fall into one default branch.
//! Outbound frames are [`Response`] values serialized with serde.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Client → Server frame as it appears on the wire
///
/// `content` is optional for actions that carry no payload
/// (`create-lobby`, `leave-lobby`).
#[derive(Debug, Deserialize)]
pub struct Inbound {
    /// Requested action, see [`Action`]
    pub action: String,
    /// Action payload: message text or lobby identifier
    #[serde(default)]
    pub content: String,
}

/// Recognized inbound actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Broadcast a chat message to the current lobby
    SendMessage,
    /// Create a new lobby and become its first member
    CreateLobby,
    /// Join an existing lobby by identifier
    JoinLobby,
    /// Leave the current lobby
    LeaveLobby,
}

impl Action {
    /// Resolve a wire action string to a command kind
    ///
    /// Returns `None` for unrecognized values; the caller logs and ignores.
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "send-message" => Some(Self::SendMessage),
            "create-lobby" => Some(Self::CreateLobby),
            "join-lobby" => Some(Self::JoinLobby),
            "leave-lobby" => Some(Self::LeaveLobby),
            _ => None,
        }
    }
}

/// Outcome tag carried by every outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Successful broadcast delivery
    Ok,
    /// Request rejected, `error` holds the reason
    Error,
    /// Lobby created, `content` holds its identifier
    LobbyCreated,
}

/// Server → Client frame
///
/// On error, `content` echoes the identifier the request referred to and
/// `error` carries a human-readable reason. Otherwise `error` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Message text or echoed identifier
    pub content: String,
    /// Outcome tag
    pub status: Status,
    /// Rejection reason, empty unless `status` is `error`
    pub error: String,
}

impl Response {
    /// Build a non-error response
    pub fn new(status: Status, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status,
            error: String::new(),
        }
    }

    /// Build an error response from an application rejection
    ///
    /// `content` echoes the identifier the rejected request referred to.
    pub fn rejection(content: impl Into<String>, err: &AppError) -> Self {
        Self {
            content: content.into(),
            status: Status::Error,
            error: err.to_string(),
        }
    }

    /// Serialize for the outbound queue
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_deserialize() {
        let json = r#"{"action": "send-message", "content": "hello"}"#;
        let msg: Inbound = serde_json::from_str(json).unwrap();
        assert_eq!(msg.action, "send-message");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_inbound_content_defaults_empty() {
        let json = r#"{"action": "create-lobby"}"#;
        let msg: Inbound = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("send-message"), Some(Action::SendMessage));
        assert_eq!(Action::parse("create-lobby"), Some(Action::CreateLobby));
        assert_eq!(Action::parse("join-lobby"), Some(Action::JoinLobby));
        assert_eq!(Action::parse("leave-lobby"), Some(Action::LeaveLobby));
        assert_eq!(Action::parse("dance"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn test_response_serialize() {
        let json = Response::new(Status::Ok, "hi").encode().unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"content\":\"hi\""));
        assert!(json.contains("\"error\":\"\""));
    }

    #[test]
    fn test_lobby_created_status_is_kebab_case() {
        let json = Response::new(Status::LobbyCreated, "some-id").encode().unwrap();
        assert!(json.contains("\"status\":\"lobby-created\""));
    }

    #[test]
    fn test_rejection_echoes_identifier() {
        let json = Response::rejection("bad-id", &AppError::InvalidLobbyId)
            .encode()
            .unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"content\":\"bad-id\""));
        assert!(json.contains("\"error\":\"lobby id is not valid\""));
    }
}
