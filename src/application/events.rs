//! Gateway Event Vocabulary
//!
//! Closed tagged-variant types for everything that crosses a live
//! connection, in both directions. Inbound frames deserialize into
//! `ClientEvent` and are dispatched exhaustively; a new event kind is a
//! compile-time-checked addition, not a string comparison.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::dto::request::{
    MarkAllSeenRequest, MarkSeenRequest, SendMessageRequest, TypingRequest,
};
use crate::application::dto::response::{IdentityResponse, MessageResponse};
use crate::domain::DeliveryStatus;
use crate::shared::error::AppError;

/// Events consumed from a live connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ClientEvent {
    #[serde(rename = "SEND_MESSAGE")]
    SendMessage(SendMessageRequest),
    #[serde(rename = "MARK_SEEN")]
    MarkSeen(MarkSeenRequest),
    #[serde(rename = "MARK_ALL_SEEN")]
    MarkAllSeen(MarkAllSeenRequest),
    #[serde(rename = "TYPING")]
    Typing(TypingRequest),
    #[serde(rename = "PING")]
    Ping,
}

/// Events produced toward live connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", content = "d")]
pub enum ServerEvent {
    #[serde(rename = "READY")]
    Ready(ReadyPayload),
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage(MessageResponse),
    #[serde(rename = "MESSAGE_STATUS")]
    MessageStatus(MessageStatusPayload),
    #[serde(rename = "PRESENCE_UPDATE")]
    PresenceUpdate(PresencePayload),
    #[serde(rename = "TYPING_INDICATOR")]
    TypingIndicator(TypingPayload),
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}

/// Sent once after a connection is registered.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub identity: IdentityResponse,
}

/// One receipt transition, pushed to the affected sender's sessions.
#[derive(Debug, Clone, Serialize)]
pub struct MessageStatusPayload {
    pub message_id: String,
    pub conversation_id: String,
    pub recipient_id: String,
    pub status: DeliveryStatus,
}

/// Online/offline edge for one identity.
#[derive(Debug, Clone, Serialize)]
pub struct PresencePayload {
    pub identity_id: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Typing state for one identity in one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TypingPayload {
    pub identity_id: String,
    pub conversation_id: String,
    pub is_typing: bool,
}

/// Client-visible failure, mirroring the HTTP error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

impl From<&AppError> for ErrorPayload {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code(),
            message: err.public_message(),
        }
    }
}

/// Fan-out destination for an outbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every live session (full-roster presence broadcast)
    All,
    /// All live sessions of one identity
    Identity(i64),
    /// One specific session
    Session(Uuid),
}

/// A server event together with where it should go.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub route: Route,
    /// Session to skip (the originating device, for echoes)
    pub exclude: Option<Uuid>,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn broadcast(event: ServerEvent) -> Self {
        Self {
            route: Route::All,
            exclude: None,
            event,
        }
    }

    pub fn to_identity(identity: i64, event: ServerEvent) -> Self {
        Self {
            route: Route::Identity(identity),
            exclude: None,
            event,
        }
    }

    pub fn to_identity_excluding(identity: i64, exclude: Uuid, event: ServerEvent) -> Self {
        Self {
            route: Route::Identity(identity),
            exclude: Some(exclude),
            event,
        }
    }

    pub fn to_session(session_id: Uuid, event: ServerEvent) -> Self {
        Self {
            route: Route::Session(session_id),
            exclude: None,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_deserializes_from_tagged_frames() {
        let frame = r#"{"t":"TYPING","d":{"conversation_id":"42","is_typing":true}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::Typing(req) => {
                assert_eq!(req.conversation_id, "42");
                assert!(req.is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_tag_is_rejected() {
        let frame = r#"{"t":"SELF_DESTRUCT","d":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn server_event_serializes_with_tag_and_payload() {
        let event = ServerEvent::PresenceUpdate(PresencePayload {
            identity_id: "7".into(),
            online: false,
            last_seen: Some("2026-01-01T00:00:00Z".into()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["t"], "PRESENCE_UPDATE");
        assert_eq!(json["d"]["online"], false);
    }
}
