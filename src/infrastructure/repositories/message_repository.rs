//! Message Repository Implementation
//!
//! PostgreSQL implementation of message and receipt persistence. The
//! message row and its per-recipient receipts commit in one transaction;
//! every receipt UPDATE names the prior status in its predicate so
//! concurrent acknowledgments can only move state forward.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    DeliveryStatus, InsertOutcome, Message, MessageRecord, MessageRepository, PendingDelivery,
    Receipt, ReceiptSummary, SeenReceipt,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn summary_of(&self, message_id: i64) -> Result<ReceiptSummary, AppError> {
        let statuses: Vec<String> =
            sqlx::query_scalar("SELECT status::text FROM message_receipts WHERE message_id = $1")
                .bind(message_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ReceiptSummary::from_statuses(
            statuses.iter().map(|s| DeliveryStatus::from_str(s)),
        ))
    }
}

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    reply_to_id: Option<i64>,
    client_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            reply_to_id: self.reply_to_id,
            client_key: self.client_key,
            created_at: self.created_at,
        }
    }
}

/// Row type for history queries (message + receipt aggregate).
#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    reply_to_id: Option<i64>,
    client_key: Option<String>,
    created_at: DateTime<Utc>,
    total: i64,
    delivered: i64,
    seen: i64,
}

impl HistoryRow {
    fn into_record(self) -> MessageRecord {
        MessageRecord {
            message: Message {
                id: self.id,
                conversation_id: self.conversation_id,
                sender_id: self.sender_id,
                content: self.content,
                reply_to_id: self.reply_to_id,
                client_key: self.client_key,
                created_at: self.created_at,
            },
            summary: ReceiptSummary {
                total: self.total as u32,
                delivered: self.delivered as u32,
                seen: self.seen as u32,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    message_id: i64,
    conversation_id: i64,
    sender_id: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SeenRow {
    message_id: i64,
    sender_id: i64,
    prior: String,
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    /// Persist a message and its `sent` receipts atomically. A replayed
    /// `client_key` hits the partial unique index and returns the original
    /// row instead of inserting a duplicate.
    async fn insert(
        &self,
        message: &Message,
        recipients: &[i64],
    ) -> Result<InsertOutcome, AppError> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, reply_to_id, client_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (conversation_id, sender_id, client_key) WHERE client_key IS NOT NULL
                DO NOTHING
            RETURNING id, conversation_id, sender_id, content, reply_to_id, client_key, created_at
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.reply_to_id)
        .bind(&message.client_key)
        .bind(message.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match inserted {
            Some(row) => {
                sqlx::query(
                    r#"
                    INSERT INTO message_receipts (message_id, recipient_id)
                    SELECT $1, unnest($2::bigint[])
                    "#,
                )
                .bind(row.id)
                .bind(recipients)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                InsertOutcome {
                    record: MessageRecord {
                        message: row.into_message(),
                        summary: ReceiptSummary::from_statuses(
                            recipients.iter().map(|_| DeliveryStatus::Sent),
                        ),
                    },
                    created: true,
                }
            }
            None => {
                drop(tx);
                let Some(client_key) = message.client_key.as_deref() else {
                    return Err(AppError::Internal(
                        "Message insert returned no row without a conflict key".into(),
                    ));
                };

                let row = sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT id, conversation_id, sender_id, content, reply_to_id, client_key, created_at
                    FROM messages
                    WHERE conversation_id = $1 AND sender_id = $2 AND client_key = $3
                    "#,
                )
                .bind(message.conversation_id)
                .bind(message.sender_id)
                .bind(client_key)
                .fetch_one(&self.pool)
                .await?;

                let summary = self.summary_of(row.id).await?;
                InsertOutcome {
                    record: MessageRecord {
                        message: row.into_message(),
                        summary,
                    },
                    created: false,
                }
            }
        };

        metrics::record_db_query("insert", "messages", start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn find_in_conversation(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<Option<Message>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, sender_id, content, reply_to_id, client_key, created_at
            FROM messages
            WHERE id = $1 AND conversation_id = $2
            "#,
        )
        .bind(message_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_message()))
    }

    async fn mark_delivered(
        &self,
        message_id: i64,
        recipient_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE message_receipts
            SET status = 'delivered', updated_at = NOW()
            WHERE message_id = $1 AND recipient_id = $2 AND status = 'sent'
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn flush_pending(&self, recipient_id: i64) -> Result<Vec<PendingDelivery>, AppError> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            WITH flipped AS (
                UPDATE message_receipts r
                SET status = 'delivered', updated_at = NOW()
                FROM messages m
                WHERE m.id = r.message_id
                  AND r.recipient_id = $1
                  AND r.status = 'sent'
                RETURNING r.message_id, m.conversation_id, m.sender_id
            )
            SELECT message_id, conversation_id, sender_id
            FROM flipped
            ORDER BY message_id
            "#,
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        metrics::record_db_query("flush_pending", "message_receipts", start.elapsed().as_secs_f64());
        Ok(rows
            .into_iter()
            .map(|r| PendingDelivery {
                message_id: r.message_id,
                conversation_id: r.conversation_id,
                sender_id: r.sender_id,
            })
            .collect())
    }

    /// Advance the actor's receipts to `seen`, returning each receipt's
    /// prior status so callers can expand skipped transitions for
    /// observers. The `status <> 'seen'` predicate makes replays no-ops.
    async fn mark_seen(
        &self,
        conversation_id: i64,
        actor_id: i64,
        up_to: Option<i64>,
    ) -> Result<Vec<SeenReceipt>, AppError> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, SeenRow>(
            r#"
            WITH target AS (
                SELECT r.message_id, m.sender_id, r.status AS prior
                FROM message_receipts r
                JOIN messages m ON m.id = r.message_id
                WHERE m.conversation_id = $1
                  AND r.recipient_id = $2
                  AND m.sender_id <> $2
                  AND r.status <> 'seen'
                  AND ($3::bigint IS NULL OR m.id <= $3)
                FOR UPDATE OF r
            ),
            updated AS (
                UPDATE message_receipts r
                SET status = 'seen', updated_at = NOW()
                FROM target t
                WHERE r.message_id = t.message_id AND r.recipient_id = $2
            )
            SELECT message_id, sender_id, prior::text AS prior
            FROM target
            ORDER BY message_id
            "#,
        )
        .bind(conversation_id)
        .bind(actor_id)
        .bind(up_to)
        .fetch_all(&self.pool)
        .await?;

        metrics::record_db_query("mark_seen", "message_receipts", start.elapsed().as_secs_f64());
        Ok(rows
            .into_iter()
            .map(|r| SeenReceipt {
                message_id: r.message_id,
                sender_id: r.sender_id,
                prior: DeliveryStatus::from_str(&r.prior),
            })
            .collect())
    }

    async fn receipts_of(&self, message_id: i64) -> Result<Vec<Receipt>, AppError> {
        #[derive(sqlx::FromRow)]
        struct ReceiptRow {
            message_id: i64,
            recipient_id: i64,
            status: String,
            updated_at: DateTime<Utc>,
        }

        let rows = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT message_id, recipient_id, status::text AS status, updated_at
            FROM message_receipts
            WHERE message_id = $1
            ORDER BY recipient_id
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Receipt {
                message_id: r.message_id,
                recipient_id: r.recipient_id,
                status: DeliveryStatus::from_str(&r.status),
                updated_at: r.updated_at,
            })
            .collect())
    }

    /// Keyset-paginated history: fetch the newest page before the cursor,
    /// returned ascending so a session replays in send order.
    async fn fetch_history(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, m.content, m.reply_to_id,
                   m.client_key, m.created_at,
                   COUNT(r.message_id) AS total,
                   COUNT(*) FILTER (WHERE r.status = 'delivered') AS delivered,
                   COUNT(*) FILTER (WHERE r.status = 'seen') AS seen
            FROM messages m
            LEFT JOIN message_receipts r ON r.message_id = m.id
            WHERE m.conversation_id = $1
              AND ($2::bigint IS NULL OR m.id < $2)
            GROUP BY m.id
            ORDER BY m.id DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<MessageRecord> =
            rows.into_iter().map(|r| r.into_record()).collect();
        records.reverse();
        Ok(records)
    }
}
