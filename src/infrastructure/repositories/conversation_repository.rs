//! Conversation Repository Implementation
//!
//! PostgreSQL implementation of conversation resolution. Direct pair
//! resolution is an atomic insert-if-absent: two racing first messages
//! converge on exactly one row, never two.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Conversation, ConversationKind, ConversationRepository, PairKey};
use crate::shared::error::AppError;

/// PostgreSQL conversation repository implementation.
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    /// Creates a new PgConversationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for conversation queries.
#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    kind: String,
    pair_low: Option<i64>,
    pair_high: Option<i64>,
    created_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        let pair = match (self.pair_low, self.pair_high) {
            (Some(low), Some(high)) => Some(PairKey::from_sorted(low, high)),
            _ => None,
        };
        Conversation {
            id: self.id,
            kind: ConversationKind::from_str(&self.kind),
            pair,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    /// Resolve the direct conversation for a canonical pair, creating it
    /// (with both membership rows) if absent. The partial unique index on
    /// (pair_low, pair_high) makes the insert race-safe; the loser of the
    /// race reads the winner's row.
    async fn resolve_or_create_pair(
        &self,
        pair: PairKey,
        candidate_id: i64,
    ) -> Result<Conversation, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (id, kind, pair_low, pair_high)
            VALUES ($1, 'direct', $2, $3)
            ON CONFLICT (pair_low, pair_high) WHERE kind = 'direct' DO NOTHING
            RETURNING id
            "#,
        )
        .bind(candidate_id)
        .bind(pair.low())
        .bind(pair.high())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = inserted {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, identity_id)
                VALUES ($1, $2), ($1, $3)
                "#,
            )
            .bind(id)
            .bind(pair.low())
            .bind(pair.high())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, kind::text AS kind, pair_low, pair_high, created_at
            FROM conversations
            WHERE kind = 'direct' AND pair_low = $1 AND pair_high = $2
            "#,
        )
        .bind(pair.low())
        .bind(pair.high())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_conversation())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, kind::text AS kind, pair_low, pair_high, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_conversation()))
    }

    async fn members_of(&self, id: i64) -> Result<Vec<i64>, AppError> {
        let members: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT identity_id
            FROM conversation_members
            WHERE conversation_id = $1
            ORDER BY identity_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }
}
