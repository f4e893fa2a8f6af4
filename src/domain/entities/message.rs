//! Message entity, per-recipient receipts, and repository trait.
//!
//! Maps to the `messages` and `message_receipts` tables. A message belongs
//! to exactly one conversation; its delivery state is tracked per recipient
//! and mutated only by the delivery pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Per-recipient delivery lifecycle matching the PostgreSQL ENUM
/// `delivery_status`. Transitions only move forward: sent → delivered → seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Persisted, recipient not yet reachable
    #[default]
    Sent,
    /// Routed to at least one of the recipient's live sessions
    Delivered,
    /// Acknowledged by the recipient (terminal)
    Seen,
}

impl DeliveryStatus {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "seen" => Self::Seen,
            _ => Self::Sent,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Seen)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake ID (primary key)
    pub id: i64,

    pub conversation_id: i64,

    pub sender_id: i64,

    /// Message content (up to 4000 characters)
    pub content: String,

    /// ID of the quoted message, if this is a reply
    pub reply_to_id: Option<i64>,

    /// Client-supplied replay key used for send deduplication
    pub client_key: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// One recipient's delivery state for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: i64,
    pub recipient_id: i64,
    pub status: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate receipt view exposed to the sender. Group status is always a
/// count, never a single flattened state shared across members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub total: u32,
    pub delivered: u32,
    pub seen: u32,
}

impl ReceiptSummary {
    pub fn from_statuses<I: IntoIterator<Item = DeliveryStatus>>(statuses: I) -> Self {
        let mut summary = Self {
            total: 0,
            delivered: 0,
            seen: 0,
        };
        for status in statuses {
            summary.total += 1;
            match status {
                DeliveryStatus::Sent => {}
                DeliveryStatus::Delivered => summary.delivered += 1,
                DeliveryStatus::Seen => summary.seen += 1,
            }
        }
        summary
    }

    /// The least-advanced receipt: what the sender sees as "the" status.
    pub fn floor_status(&self) -> DeliveryStatus {
        if self.total == 0 {
            DeliveryStatus::Sent
        } else if self.seen == self.total {
            DeliveryStatus::Seen
        } else if self.seen + self.delivered == self.total {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }

    pub fn seen_by_all(&self) -> bool {
        self.total > 0 && self.seen == self.total
    }
}

/// A persisted message together with its receipt aggregate.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message: Message,
    pub summary: ReceiptSummary,
}

/// Outcome of an insert attempt: either a fresh row or the existing one a
/// replayed `client_key` matched.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub record: MessageRecord,
    pub created: bool,
}

/// A receipt flipped to `delivered` by a connect-time backlog flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub message_id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
}

/// A receipt advanced by a seen-marking pass, with the state it held before
/// so skipped transitions can be expanded for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenReceipt {
    pub message_id: i64,
    pub sender_id: i64,
    pub prior: DeliveryStatus,
}

/// Repository trait for Message and receipt data access operations.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message together with one `sent` receipt per recipient, in
    /// a single transaction. If `client_key` matches an existing row for
    /// (conversation, sender), return that row with `created = false`.
    async fn insert(
        &self,
        message: &Message,
        recipients: &[i64],
    ) -> Result<InsertOutcome, AppError>;

    /// Find a message by id, scoped to a conversation (reply resolution).
    async fn find_in_conversation(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<Option<Message>, AppError>;

    /// Advance a single recipient's receipt to `delivered` if it is still
    /// `sent`. Returns whether a row changed.
    async fn mark_delivered(&self, message_id: i64, recipient_id: i64)
        -> Result<bool, AppError>;

    /// Flip every `sent` receipt held by `recipient_id` to `delivered`,
    /// returning the affected messages in send order (connect backlog).
    async fn flush_pending(&self, recipient_id: i64) -> Result<Vec<PendingDelivery>, AppError>;

    /// Advance the actor's receipts in a conversation to `seen`, restricted
    /// to messages authored by others and not already seen, optionally
    /// bounded by `up_to` (message id). Returns affected receipts with
    /// their prior status, in send order.
    async fn mark_seen(
        &self,
        conversation_id: i64,
        actor_id: i64,
        up_to: Option<i64>,
    ) -> Result<Vec<SeenReceipt>, AppError>;

    /// All receipts of a message.
    async fn receipts_of(&self, message_id: i64) -> Result<Vec<Receipt>, AppError>;

    /// Keyset-paginated history for a conversation, ascending by id.
    async fn fetch_history(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, AppError>;
}
