//! Response DTOs
//!
//! Data structures for gateway payloads and HTTP response bodies. IDs are
//! serialized as strings.

use serde::Serialize;

use crate::domain::{DeliveryStatus, Identity, MessageRecord, ReceiptSummary};

/// Identity response
#[derive(Debug, Clone, Serialize)]
pub struct IdentityResponse {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id.to_string(),
            username: identity.username,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
        }
    }
}

/// Per-recipient receipt counts shown to the sender. A group message is
/// "delivered to k of n", never one flattened status.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptSummaryResponse {
    pub total: u32,
    pub delivered: u32,
    pub seen: u32,
}

impl From<ReceiptSummary> for ReceiptSummaryResponse {
    fn from(summary: ReceiptSummary) -> Self {
        Self {
            total: summary.total,
            delivered: summary.delivered,
            seen: summary.seen,
        }
    }
}

/// Message response
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub status: DeliveryStatus,
    pub receipts: ReceiptSummaryResponse,
    pub created_at: String,
}

impl From<MessageRecord> for MessageResponse {
    fn from(record: MessageRecord) -> Self {
        let MessageRecord { message, summary } = record;
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            content: message.content,
            reply_to: message.reply_to_id.map(|id| id.to_string()),
            status: summary.floor_status(),
            receipts: summary.into(),
            created_at: message.created_at.to_rfc3339(),
        }
    }
}
