//! Request DTOs
//!
//! Wire-level payloads of inbound gateway events and HTTP queries. IDs
//! arrive as strings (JSON numbers lose precision past 2^53) and are parsed
//! at the presentation boundary.

use serde::Deserialize;
use validator::Validate;

/// Where an outbound message should go: a peer identity (direct, resolving
/// the conversation lazily) or an existing conversation id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendTarget {
    Direct { recipient_id: String },
    Conversation { conversation_id: String },
}

/// Send message payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendMessageRequest {
    pub target: SendTarget,

    #[validate(length(min = 1, max = 4000, message = "Content must be 1-4000 characters"))]
    pub content: String,

    /// Quoted message id; a dangling reference degrades to no quote
    pub reply_to: Option<String>,

    #[validate(length(max = 64, message = "Client key must be at most 64 characters"))]
    pub client_key: Option<String>,
}

/// Mark seen payload (bounded acknowledgment)
#[derive(Debug, Clone, Deserialize)]
pub struct MarkSeenRequest {
    pub conversation_id: String,
    /// Highest message id covered by this acknowledgment
    pub up_to: String,
}

/// Mark all seen payload
#[derive(Debug, Clone, Deserialize)]
pub struct MarkAllSeenRequest {
    pub conversation_id: String,
}

/// Typing payload
#[derive(Debug, Clone, Deserialize)]
pub struct TypingRequest {
    pub conversation_id: String,
    pub is_typing: bool,
}

/// History query parameters (keyset pagination)
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<i64>,
}
