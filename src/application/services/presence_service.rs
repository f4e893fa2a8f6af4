//! Presence Broadcaster
//!
//! Derives online/offline signals from session-registry transitions and
//! manages per-(identity, conversation) typing timers. Presence state is
//! never persisted; the only storage touch is a best-effort `last_seen_at`
//! stamp when the final session disconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::events::{Outbound, PresencePayload, ServerEvent, TypingPayload};
use crate::domain::IdentityRepository;
use crate::infrastructure::metrics;

/// Default lifetime of a typing indicator before it auto-clears.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);

type TypingKey = (i64, i64); // (identity, conversation)

struct TypingEntry {
    seq: u64,
    /// Conversation peers captured at start, so expiry and disconnect
    /// cleanup never hit the database.
    participants: Vec<i64>,
    handle: JoinHandle<()>,
}

/// Cancellable typing timers. A newer typing event or a disconnect aborts
/// the prior timer; the sequence number makes expiry emission race-safe.
#[derive(Clone)]
struct TypingTracker {
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    next_seq: Arc<AtomicU64>,
}

impl TypingTracker {
    fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn start(
        &self,
        identity: i64,
        conversation_id: i64,
        participants: Vec<i64>,
        ttl: Duration,
        tx: mpsc::UnboundedSender<Outbound>,
    ) {
        let key = (identity, conversation_id);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let entries = Arc::clone(&self.entries);
        let expiry_participants = participants.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // Emit only if no newer typing event replaced this entry.
            if entries.remove_if(&key, |_, entry| entry.seq == seq).is_some() {
                for peer in expiry_participants {
                    let _ = tx.send(Outbound::to_identity(
                        peer,
                        ServerEvent::TypingIndicator(TypingPayload {
                            identity_id: identity.to_string(),
                            conversation_id: conversation_id.to_string(),
                            is_typing: false,
                        }),
                    ));
                }
            }
        });

        if let Some(prev) = self.entries.insert(
            key,
            TypingEntry {
                seq,
                participants,
                handle,
            },
        ) {
            prev.handle.abort();
        }
    }

    fn cancel(&self, identity: i64, conversation_id: i64) -> Option<Vec<i64>> {
        self.entries
            .remove(&(identity, conversation_id))
            .map(|(_, entry)| {
                entry.handle.abort();
                entry.participants
            })
    }

    /// Cancel every timer owned by the identity, returning the affected
    /// (conversation, participants) pairs.
    fn cancel_all(&self, identity: i64) -> Vec<(i64, Vec<i64>)> {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .map(|entry| *entry.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                self.entries.remove(&key).map(|(_, entry)| {
                    entry.handle.abort();
                    (key.1, entry.participants)
                })
            })
            .collect()
    }
}

/// Presence broadcaster service.
pub struct PresenceService<I: IdentityRepository> {
    identity_repo: Arc<I>,
    typing: TypingTracker,
    typing_ttl: Duration,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl<I: IdentityRepository> PresenceService<I> {
    pub fn new(
        identity_repo: Arc<I>,
        typing_ttl: Duration,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            identity_repo,
            typing: TypingTracker::new(),
            typing_ttl,
            outbound_tx,
        }
    }

    fn emit(&self, outbound: Outbound) {
        let _ = self.outbound_tx.send(outbound);
    }

    fn emit_typing(&self, identity: i64, conversation_id: i64, peers: &[i64], is_typing: bool) {
        for &peer in peers {
            self.emit(Outbound::to_identity(
                peer,
                ServerEvent::TypingIndicator(TypingPayload {
                    identity_id: identity.to_string(),
                    conversation_id: conversation_id.to_string(),
                    is_typing,
                }),
            ));
        }
    }

    /// An identity's session registered. Only the first session produces a
    /// roster-wide online broadcast.
    pub fn session_opened(&self, identity: i64, first_session: bool) {
        if !first_session {
            return;
        }
        metrics::record_presence_broadcast("online");
        self.emit(Outbound::broadcast(ServerEvent::PresenceUpdate(
            PresencePayload {
                identity_id: identity.to_string(),
                online: true,
                last_seen: None,
            },
        )));
    }

    /// An identity's session unregistered. The offline broadcast fires
    /// synchronously with the *last* disconnect, exactly once, with no
    /// debounce against an immediate reconnect. Outstanding typing timers
    /// are cancelled and closed out.
    pub async fn session_closed(&self, identity: i64, last_session: bool) {
        if !last_session {
            return;
        }

        for (conversation_id, participants) in self.typing.cancel_all(identity) {
            self.emit_typing(identity, conversation_id, &participants, false);
        }

        let now = Utc::now();
        metrics::record_presence_broadcast("offline");
        self.emit(Outbound::broadcast(ServerEvent::PresenceUpdate(
            PresencePayload {
                identity_id: identity.to_string(),
                online: false,
                last_seen: Some(now.to_rfc3339()),
            },
        )));

        // Best-effort stamp; presence itself is derived, not persisted.
        if let Err(e) = self.identity_repo.touch_last_seen(identity, now).await {
            tracing::warn!(identity, error = %e, "Failed to stamp last_seen");
        }
    }

    /// Typing signal from a live session. `participants` is the
    /// conversation's peer set (excluding the typist), resolved and
    /// membership-checked by the caller. Never persisted, never broadcast
    /// beyond those peers.
    pub fn typing(
        &self,
        identity: i64,
        conversation_id: i64,
        participants: Vec<i64>,
        is_typing: bool,
    ) {
        if is_typing {
            self.emit_typing(identity, conversation_id, &participants, true);
            self.typing.start(
                identity,
                conversation_id,
                participants,
                self.typing_ttl,
                self.outbound_tx.clone(),
            );
        } else {
            self.typing.cancel(identity, conversation_id);
            self.emit_typing(identity, conversation_id, &participants, false);
        }
    }
}
