//! Conversation entity and repository trait.
//!
//! Maps to the `conversations` and `conversation_members` tables. A direct
//! conversation is keyed by its canonical identity pair and created lazily
//! on first message; a group carries an explicitly assigned id and a fixed
//! member set resolved outside this core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::PairKey;
use crate::shared::error::AppError;

/// Conversation kinds matching the PostgreSQL ENUM `conversation_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// A 1:1 pair, id derived lazily from the canonical pair key
    Direct,
    /// An explicit participant set with an assigned id
    Group,
}

impl ConversationKind {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s {
            "group" => Self::Group,
            _ => Self::Direct,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

/// A 1:1 pair or explicit group of participants sharing a message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Snowflake ID (primary key)
    pub id: i64,

    pub kind: ConversationKind,

    /// Canonical sorted pair for direct conversations; None for groups
    pub pair: Option<PairKey>,

    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_direct(&self) -> bool {
        self.kind == ConversationKind::Direct
    }
}

/// Repository trait for Conversation data access operations.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Resolve the direct conversation for a canonical pair, creating it if
    /// absent. Must be atomic under concurrent callers: two racing first
    /// messages converge on the same row.
    ///
    /// `candidate_id` is used only when this call wins the insert race.
    async fn resolve_or_create_pair(
        &self,
        pair: PairKey,
        candidate_id: i64,
    ) -> Result<Conversation, AppError>;

    /// Find a conversation by its Snowflake ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError>;

    /// All member identity ids of a conversation.
    async fn members_of(&self, id: i64) -> Result<Vec<i64>, AppError>;
}
