//! Delivery Pipeline
//!
//! Accepts an outbound message, persists it, drives the per-recipient
//! status state machine, and routes the message plus status updates to the
//! right live sessions.
//!
//! Concurrency contract: the registry is only consulted *after* a
//! successful persistence write (read-after-write), and a per-conversation
//! mutex serializes sends and seen-marking within one conversation so each
//! recipient session observes messages in send order. No registry state is
//! held across a persistence call.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::application::dto::response::MessageResponse;
use crate::application::events::{MessageStatusPayload, Outbound, ServerEvent};
use crate::application::services::LiveRoster;
use crate::domain::services::{advance, Advance};
use crate::domain::{
    ConversationRepository, DeliveryStatus, IdentityRepository, Message, MessageRecord,
    MessageRepository, PairKey, ReceiptSummary,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// Maximum message content length in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// History page-size ceiling.
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Resolved send destination.
#[derive(Debug, Clone)]
pub enum DeliveryTarget {
    /// A peer identity; the direct conversation is resolved lazily
    Direct(i64),
    /// An existing conversation id (groups, or a known direct thread)
    Conversation(i64),
}

/// Send message input, already parsed at the presentation boundary.
#[derive(Debug, Clone)]
pub struct SendMessageDto {
    pub target: DeliveryTarget,
    pub content: String,
    pub reply_to: Option<i64>,
    pub client_key: Option<String>,
}

/// Delivery pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("Recipient not found")]
    RecipientNotFound,

    #[error("Not a participant of this conversation")]
    NotAParticipant,

    #[error("Message content must not be empty")]
    EmptyContent,

    #[error("Message content too long")]
    ContentTooLong,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AppError> for DeliveryError {
    fn from(err: AppError) -> Self {
        DeliveryError::Internal(err.to_string())
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::ConversationNotFound => AppError::NotFound("Conversation not found".into()),
            DeliveryError::RecipientNotFound => AppError::NotFound("Recipient not found".into()),
            DeliveryError::NotAParticipant => {
                AppError::Forbidden("Not a participant of this conversation".into())
            }
            DeliveryError::EmptyContent => {
                AppError::BadRequest("Message content must not be empty".into())
            }
            DeliveryError::ContentTooLong => AppError::BadRequest(format!(
                "Message content too long (max {} characters)",
                MAX_CONTENT_CHARS
            )),
            DeliveryError::InvalidTarget(msg) => AppError::BadRequest(msg),
            DeliveryError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

/// The delivery pipeline, generic over its storage and roster seams.
pub struct DeliveryService<M, C, I, R>
where
    M: MessageRepository,
    C: ConversationRepository,
    I: IdentityRepository,
    R: LiveRoster,
{
    message_repo: Arc<M>,
    conversation_repo: Arc<C>,
    identity_repo: Arc<I>,
    roster: Arc<R>,
    id_generator: Arc<SnowflakeGenerator>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Per-conversation critical sections; unrelated conversations proceed
    /// fully in parallel.
    conversation_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl<M, C, I, R> DeliveryService<M, C, I, R>
where
    M: MessageRepository,
    C: ConversationRepository,
    I: IdentityRepository,
    R: LiveRoster,
{
    pub fn new(
        message_repo: Arc<M>,
        conversation_repo: Arc<C>,
        identity_repo: Arc<I>,
        roster: Arc<R>,
        id_generator: Arc<SnowflakeGenerator>,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            message_repo,
            conversation_repo,
            identity_repo,
            roster,
            id_generator,
            outbound_tx,
            conversation_locks: DashMap::new(),
        }
    }

    fn conversation_lock(&self, conversation_id: i64) -> Arc<Mutex<()>> {
        self.conversation_locks
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    fn emit(&self, outbound: Outbound) {
        let _ = self.outbound_tx.send(outbound);
    }

    fn emit_status(
        &self,
        to: i64,
        message_id: i64,
        conversation_id: i64,
        recipient_id: i64,
        status: DeliveryStatus,
    ) {
        metrics::record_delivery_transition(status.as_str());
        self.emit(Outbound::to_identity(
            to,
            ServerEvent::MessageStatus(MessageStatusPayload {
                message_id: message_id.to_string(),
                conversation_id: conversation_id.to_string(),
                recipient_id: recipient_id.to_string(),
                status,
            }),
        ));
    }

    /// Send a message, persist it atomically with its receipts, and fan it
    /// out. Returns the created (or replayed) message as seen by the
    /// sender. `origin` is the originating session, excluded from the
    /// sender-side echo; it receives the returned response directly.
    pub async fn send_message(
        &self,
        sender_id: i64,
        origin: Option<Uuid>,
        dto: SendMessageDto,
    ) -> Result<MessageResponse, DeliveryError> {
        if dto.content.trim().is_empty() {
            return Err(DeliveryError::EmptyContent);
        }
        if dto.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DeliveryError::ContentTooLong);
        }

        let (conversation_id, recipients) = self.resolve_target(sender_id, &dto.target).await?;

        // Soft resolution: a deleted or foreign referent drops the quote,
        // never the send.
        let reply_to_id = match dto.reply_to {
            Some(ref_id) => self.resolve_reply(conversation_id, ref_id).await?,
            None => None,
        };

        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        let message = Message {
            id: self.id_generator.generate(),
            conversation_id,
            sender_id,
            content: dto.content,
            reply_to_id,
            client_key: dto.client_key,
            created_at: Utc::now(),
        };

        // Nothing is emitted unless this write succeeds.
        let outcome = self.message_repo.insert(&message, &recipients).await?;

        if !outcome.created {
            tracing::debug!(
                message_id = outcome.record.message.id,
                sender_id,
                "Replayed send deduplicated"
            );
            return Ok(MessageResponse::from(outcome.record));
        }

        // The write committed; decide delivered-at-send against the roster
        // as of now, not a pre-write snapshot.
        let mut statuses = Vec::with_capacity(recipients.len());
        for &recipient in &recipients {
            let delivered = self.roster.is_online(recipient)
                && self
                    .message_repo
                    .mark_delivered(message.id, recipient)
                    .await?;
            statuses.push(if delivered {
                metrics::record_delivery_transition(DeliveryStatus::Delivered.as_str());
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Sent
            });
        }

        let record = MessageRecord {
            message: outcome.record.message,
            summary: ReceiptSummary::from_statuses(statuses),
        };
        let response = MessageResponse::from(record);
        metrics::record_message_routed(match dto.target {
            DeliveryTarget::Direct(_) => "direct",
            DeliveryTarget::Conversation(_) => "conversation",
        });

        for &recipient in &recipients {
            self.emit(Outbound::to_identity(
                recipient,
                ServerEvent::NewMessage(response.clone()),
            ));
        }
        // Echo to the sender's other devices with the same id/timestamp.
        let echo = ServerEvent::NewMessage(response.clone());
        match origin {
            Some(session_id) => {
                self.emit(Outbound::to_identity_excluding(sender_id, session_id, echo))
            }
            None => self.emit(Outbound::to_identity(sender_id, echo)),
        }

        Ok(response)
    }

    /// Connect-time backlog flush: flip every `sent` receipt held by the
    /// identity to `delivered` and notify each original sender. Delivery
    /// must not depend on a live race at send time.
    pub async fn connection_ready(&self, identity: i64) -> Result<usize, DeliveryError> {
        let pending = self.message_repo.flush_pending(identity).await?;
        for delivery in &pending {
            self.emit_status(
                delivery.sender_id,
                delivery.message_id,
                delivery.conversation_id,
                identity,
                DeliveryStatus::Delivered,
            );
        }
        if !pending.is_empty() {
            tracing::debug!(
                identity,
                count = pending.len(),
                "Flushed pending deliveries on connect"
            );
        }
        Ok(pending.len())
    }

    /// Acknowledge messages in a conversation up to `up_to` (all of them
    /// when `None`). Advances only receipts the actor holds on messages
    /// authored by others; receipts that never saw a delivered pass emit
    /// both transitions in order so observers never see a skip.
    pub async fn mark_seen(
        &self,
        actor_id: i64,
        conversation_id: i64,
        up_to: Option<i64>,
    ) -> Result<usize, DeliveryError> {
        self.require_membership(actor_id, conversation_id).await?;

        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        let advanced = self
            .message_repo
            .mark_seen(conversation_id, actor_id, up_to)
            .await?;

        for receipt in &advanced {
            match advance(receipt.prior, DeliveryStatus::Seen) {
                Advance::Stepped(steps) => {
                    for status in steps {
                        self.emit_status(
                            receipt.sender_id,
                            receipt.message_id,
                            conversation_id,
                            actor_id,
                            status,
                        );
                    }
                }
                Advance::Unchanged => {}
            }
        }

        Ok(advanced.len())
    }

    /// Conversation history, ascending by id, membership-checked.
    pub async fn history(
        &self,
        actor_id: i64,
        conversation_id: i64,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<MessageResponse>, DeliveryError> {
        self.require_membership(actor_id, conversation_id).await?;

        let limit = limit.unwrap_or(50).clamp(1, MAX_HISTORY_LIMIT);
        let records = self
            .message_repo
            .fetch_history(conversation_id, before, limit)
            .await?;

        Ok(records.into_iter().map(MessageResponse::from).collect())
    }

    /// The conversation's other participants, for typing fan-out.
    /// Verifies the actor belongs to the conversation.
    pub async fn participants(
        &self,
        actor_id: i64,
        conversation_id: i64,
    ) -> Result<Vec<i64>, DeliveryError> {
        let members = self.members_checked(actor_id, conversation_id).await?;
        Ok(members.into_iter().filter(|m| *m != actor_id).collect())
    }

    async fn require_membership(
        &self,
        actor_id: i64,
        conversation_id: i64,
    ) -> Result<(), DeliveryError> {
        self.members_checked(actor_id, conversation_id).await?;
        Ok(())
    }

    async fn members_checked(
        &self,
        actor_id: i64,
        conversation_id: i64,
    ) -> Result<Vec<i64>, DeliveryError> {
        if self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .is_none()
        {
            return Err(DeliveryError::ConversationNotFound);
        }
        let members = self.conversation_repo.members_of(conversation_id).await?;
        if !members.contains(&actor_id) {
            return Err(DeliveryError::NotAParticipant);
        }
        Ok(members)
    }

    /// Resolve the destination conversation and its recipient set. Direct
    /// targets resolve (or lazily create) the canonical pair conversation;
    /// conversation targets are looked up and membership-checked, never
    /// created implicitly.
    async fn resolve_target(
        &self,
        sender_id: i64,
        target: &DeliveryTarget,
    ) -> Result<(i64, Vec<i64>), DeliveryError> {
        match *target {
            DeliveryTarget::Direct(recipient_id) => {
                if !self.identity_repo.exists(recipient_id).await? {
                    return Err(DeliveryError::RecipientNotFound);
                }
                let pair = PairKey::new(sender_id, recipient_id).map_err(|_| {
                    DeliveryError::InvalidTarget(
                        "Cannot open a direct conversation with yourself".into(),
                    )
                })?;
                let conversation = self
                    .conversation_repo
                    .resolve_or_create_pair(pair, self.id_generator.generate())
                    .await?;
                Ok((conversation.id, vec![recipient_id]))
            }
            DeliveryTarget::Conversation(conversation_id) => {
                let members = self.members_checked(sender_id, conversation_id).await?;
                let recipients: Vec<i64> =
                    members.into_iter().filter(|m| *m != sender_id).collect();
                Ok((conversation_id, recipients))
            }
        }
    }

    /// Reply Linker: resolve a quoted-message reference within the
    /// conversation. A missing referent yields `None` (the send continues
    /// without a quote); only storage failures propagate.
    async fn resolve_reply(
        &self,
        conversation_id: i64,
        reply_ref: i64,
    ) -> Result<Option<i64>, DeliveryError> {
        let quoted = self
            .message_repo
            .find_in_conversation(conversation_id, reply_ref)
            .await?;
        if quoted.is_none() {
            tracing::debug!(
                conversation_id,
                reply_ref,
                "Reply referent missing, sending without quote"
            );
        }
        Ok(quoted.map(|m| m.id))
    }
}
