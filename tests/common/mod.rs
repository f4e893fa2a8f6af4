//! Common Test Utilities
//!
//! In-memory repository fakes, a fixed roster, and a service harness for
//! driving the delivery pipeline and presence broadcaster without Postgres
//! or a live socket. The fakes honor the same contracts the Postgres
//! implementations do: atomic pair resolution, client-key dedupe, and
//! forward-only receipt updates.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use chat_relay::application::events::{Outbound, Route, ServerEvent};
use chat_relay::application::services::{DeliveryService, LiveRoster, PresenceService};
use chat_relay::domain::{
    Conversation, ConversationKind, ConversationRepository, DeliveryStatus, Identity,
    IdentityRepository, InsertOutcome, Message, MessageRecord, MessageRepository, PairKey,
    PendingDelivery, Receipt, ReceiptSummary, SeenReceipt,
};
use chat_relay::shared::error::AppError;
use chat_relay::shared::snowflake::{SnowflakeGenerator, DEFAULT_EPOCH};

// ---------------------------------------------------------------------------
// Identity fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    identities: Mutex<HashMap<i64, Identity>>,
    last_seen_calls: Mutex<Vec<i64>>,
}

impl InMemoryIdentityRepository {
    pub fn seed(&self, id: i64, username: &str) {
        self.identities.lock().insert(
            id,
            Identity {
                id,
                username: username.to_string(),
                display_name: None,
                avatar_url: None,
                last_seen_at: None,
                created_at: Utc::now(),
            },
        );
    }

    pub fn last_seen_calls(&self) -> Vec<i64> {
        self.last_seen_calls.lock().clone()
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>, AppError> {
        Ok(self.identities.lock().get(&id).cloned())
    }

    async fn exists(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.identities.lock().contains_key(&id))
    }

    async fn touch_last_seen(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.last_seen_calls.lock().push(id);
        if let Some(identity) = self.identities.lock().get_mut(&id) {
            identity.last_seen_at = Some(at);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversation fake
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConversationStore {
    conversations: HashMap<i64, Conversation>,
    members: HashMap<i64, Vec<i64>>,
    pairs: HashMap<(i64, i64), i64>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: Mutex<ConversationStore>,
}

impl InMemoryConversationRepository {
    /// Groups are created externally; tests seed them directly.
    pub fn seed_group(&self, id: i64, members: &[i64]) {
        let mut state = self.state.lock();
        state.conversations.insert(
            id,
            Conversation {
                id,
                kind: ConversationKind::Group,
                pair: None,
                created_at: Utc::now(),
            },
        );
        state.members.insert(id, members.to_vec());
    }

    pub fn conversation_count(&self) -> usize {
        self.state.lock().conversations.len()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn resolve_or_create_pair(
        &self,
        pair: PairKey,
        candidate_id: i64,
    ) -> Result<Conversation, AppError> {
        let mut state = self.state.lock();
        let key = (pair.low(), pair.high());
        if let Some(&id) = state.pairs.get(&key) {
            return Ok(state.conversations[&id].clone());
        }
        let conversation = Conversation {
            id: candidate_id,
            kind: ConversationKind::Direct,
            pair: Some(pair),
            created_at: Utc::now(),
        };
        state.conversations.insert(candidate_id, conversation.clone());
        state.members.insert(candidate_id, pair.members().to_vec());
        state.pairs.insert(key, candidate_id);
        Ok(conversation)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    async fn members_of(&self, id: i64) -> Result<Vec<i64>, AppError> {
        Ok(self.state.lock().members.get(&id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Message fake
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StoredReceipt {
    status: DeliveryStatus,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MessageStore {
    messages: BTreeMap<i64, Message>,
    receipts: BTreeMap<(i64, i64), StoredReceipt>,
}

impl MessageStore {
    fn summary_of(&self, message_id: i64) -> ReceiptSummary {
        ReceiptSummary::from_statuses(
            self.receipts
                .range((message_id, i64::MIN)..=(message_id, i64::MAX))
                .map(|(_, r)| r.status),
        )
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    state: Mutex<MessageStore>,
}

impl InMemoryMessageRepository {
    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn status_of(&self, message_id: i64, recipient_id: i64) -> Option<DeliveryStatus> {
        self.state
            .lock()
            .receipts
            .get(&(message_id, recipient_id))
            .map(|r| r.status)
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(
        &self,
        message: &Message,
        recipients: &[i64],
    ) -> Result<InsertOutcome, AppError> {
        let mut state = self.state.lock();

        if let Some(client_key) = message.client_key.as_deref() {
            let existing = state
                .messages
                .values()
                .find(|m| {
                    m.conversation_id == message.conversation_id
                        && m.sender_id == message.sender_id
                        && m.client_key.as_deref() == Some(client_key)
                })
                .cloned();
            if let Some(existing) = existing {
                let summary = state.summary_of(existing.id);
                return Ok(InsertOutcome {
                    record: MessageRecord {
                        message: existing,
                        summary,
                    },
                    created: false,
                });
            }
        }

        state.messages.insert(message.id, message.clone());
        for &recipient in recipients {
            state.receipts.insert(
                (message.id, recipient),
                StoredReceipt {
                    status: DeliveryStatus::Sent,
                    updated_at: message.created_at,
                },
            );
        }

        Ok(InsertOutcome {
            record: MessageRecord {
                message: message.clone(),
                summary: ReceiptSummary::from_statuses(
                    recipients.iter().map(|_| DeliveryStatus::Sent),
                ),
            },
            created: true,
        })
    }

    async fn find_in_conversation(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<Option<Message>, AppError> {
        Ok(self
            .state
            .lock()
            .messages
            .get(&message_id)
            .filter(|m| m.conversation_id == conversation_id)
            .cloned())
    }

    async fn mark_delivered(
        &self,
        message_id: i64,
        recipient_id: i64,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        if let Some(receipt) = state.receipts.get_mut(&(message_id, recipient_id)) {
            if receipt.status == DeliveryStatus::Sent {
                receipt.status = DeliveryStatus::Delivered;
                receipt.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn flush_pending(&self, recipient_id: i64) -> Result<Vec<PendingDelivery>, AppError> {
        let mut state = self.state.lock();
        let mut flipped = Vec::new();

        let pending: Vec<i64> = state
            .receipts
            .iter()
            .filter(|((_, recipient), receipt)| {
                *recipient == recipient_id && receipt.status == DeliveryStatus::Sent
            })
            .map(|((message_id, _), _)| *message_id)
            .collect();

        for message_id in pending {
            if let Some(receipt) = state.receipts.get_mut(&(message_id, recipient_id)) {
                receipt.status = DeliveryStatus::Delivered;
                receipt.updated_at = Utc::now();
            }
            let message = &state.messages[&message_id];
            flipped.push(PendingDelivery {
                message_id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
            });
        }

        flipped.sort_by_key(|p| p.message_id);
        Ok(flipped)
    }

    async fn mark_seen(
        &self,
        conversation_id: i64,
        actor_id: i64,
        up_to: Option<i64>,
    ) -> Result<Vec<SeenReceipt>, AppError> {
        let mut state = self.state.lock();
        let mut advanced = Vec::new();

        let targets: Vec<(i64, i64)> = state
            .receipts
            .iter()
            .filter(|((message_id, recipient), receipt)| {
                if *recipient != actor_id || receipt.status == DeliveryStatus::Seen {
                    return false;
                }
                let message = match state.messages.get(message_id) {
                    Some(m) => m,
                    None => return false,
                };
                message.conversation_id == conversation_id
                    && message.sender_id != actor_id
                    && up_to.map(|bound| *message_id <= bound).unwrap_or(true)
            })
            .map(|(key, _)| *key)
            .collect();

        for key in targets {
            let sender_id = state.messages[&key.0].sender_id;
            if let Some(receipt) = state.receipts.get_mut(&key) {
                advanced.push(SeenReceipt {
                    message_id: key.0,
                    sender_id,
                    prior: receipt.status,
                });
                receipt.status = DeliveryStatus::Seen;
                receipt.updated_at = Utc::now();
            }
        }

        advanced.sort_by_key(|r| r.message_id);
        Ok(advanced)
    }

    async fn receipts_of(&self, message_id: i64) -> Result<Vec<Receipt>, AppError> {
        Ok(self
            .state
            .lock()
            .receipts
            .range((message_id, i64::MIN)..=(message_id, i64::MAX))
            .map(|((message_id, recipient_id), receipt)| Receipt {
                message_id: *message_id,
                recipient_id: *recipient_id,
                status: receipt.status,
                updated_at: receipt.updated_at,
            })
            .collect())
    }

    async fn fetch_history(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let state = self.state.lock();
        let mut records: Vec<MessageRecord> = state
            .messages
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && before.map(|bound| m.id < bound).unwrap_or(true)
            })
            .map(|m| MessageRecord {
                message: m.clone(),
                summary: state.summary_of(m.id),
            })
            .collect();

        let skip = records.len().saturating_sub(limit as usize);
        Ok(records.split_off(skip))
    }
}

// ---------------------------------------------------------------------------
// Fixed roster
// ---------------------------------------------------------------------------

/// A roster with explicitly controlled session counts.
#[derive(Default)]
pub struct FixedRoster {
    sessions: DashMap<i64, usize>,
}

impl FixedRoster {
    pub fn connect(&self, identity: i64) {
        *self.sessions.entry(identity).or_insert(0) += 1;
    }

    pub fn disconnect(&self, identity: i64) {
        if let Some(mut count) = self.sessions.get_mut(&identity) {
            *count = count.saturating_sub(1);
        }
    }
}

impl LiveRoster for FixedRoster {
    fn is_online(&self, identity: i64) -> bool {
        self.live_session_count(identity) > 0
    }

    fn live_session_count(&self, identity: i64) -> usize {
        self.sessions.get(&identity).map(|c| *c).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestDelivery = DeliveryService<
    InMemoryMessageRepository,
    InMemoryConversationRepository,
    InMemoryIdentityRepository,
    FixedRoster,
>;

pub struct TestHarness {
    pub delivery: Arc<TestDelivery>,
    pub presence: Arc<PresenceService<InMemoryIdentityRepository>>,
    pub roster: Arc<FixedRoster>,
    pub identities: Arc<InMemoryIdentityRepository>,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_typing_ttl(Duration::from_secs(3))
    }

    pub fn with_typing_ttl(typing_ttl: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let identities = Arc::new(InMemoryIdentityRepository::default());
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let roster = Arc::new(FixedRoster::default());
        let snowflake = Arc::new(SnowflakeGenerator::new(1, DEFAULT_EPOCH));

        let delivery = Arc::new(DeliveryService::new(
            Arc::clone(&messages),
            Arc::clone(&conversations),
            Arc::clone(&identities),
            Arc::clone(&roster),
            snowflake,
            outbound_tx.clone(),
        ));

        let presence = Arc::new(PresenceService::new(
            Arc::clone(&identities),
            typing_ttl,
            outbound_tx,
        ));

        Self {
            delivery,
            presence,
            roster,
            identities,
            conversations,
            messages,
            outbound_rx,
        }
    }

    /// Drain every outbound event currently queued.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// Status updates routed to one identity: (message_id, status) in order.
pub fn status_updates_to(events: &[Outbound], identity: i64) -> Vec<(i64, DeliveryStatus)> {
    events
        .iter()
        .filter(|o| o.route == Route::Identity(identity))
        .filter_map(|o| match &o.event {
            ServerEvent::MessageStatus(payload) => Some((
                payload.message_id.parse().expect("numeric message id"),
                payload.status,
            )),
            _ => None,
        })
        .collect()
}

/// New-message events routed to one identity: message ids in order.
pub fn new_messages_to(events: &[Outbound], identity: i64) -> Vec<i64> {
    events
        .iter()
        .filter(|o| o.route == Route::Identity(identity))
        .filter_map(|o| match &o.event {
            ServerEvent::NewMessage(message) => {
                Some(message.id.parse().expect("numeric message id"))
            }
            _ => None,
        })
        .collect()
}

/// Presence broadcasts observed on the channel: (identity, online) in order.
pub fn presence_broadcasts(events: &[Outbound]) -> Vec<(i64, bool)> {
    events
        .iter()
        .filter(|o| o.route == Route::All)
        .filter_map(|o| match &o.event {
            ServerEvent::PresenceUpdate(payload) => Some((
                payload.identity_id.parse().expect("numeric identity id"),
                payload.online,
            )),
            _ => None,
        })
        .collect()
}

/// Typing indicators routed to one identity: (typist, conversation, is_typing).
pub fn typing_indicators_to(events: &[Outbound], identity: i64) -> Vec<(i64, i64, bool)> {
    events
        .iter()
        .filter(|o| o.route == Route::Identity(identity))
        .filter_map(|o| match &o.event {
            ServerEvent::TypingIndicator(payload) => Some((
                payload.identity_id.parse().expect("numeric identity id"),
                payload
                    .conversation_id
                    .parse()
                    .expect("numeric conversation id"),
                payload.is_typing,
            )),
            _ => None,
        })
        .collect()
}
