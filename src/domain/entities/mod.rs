//! # Domain Entities
//!
//! Core entities of the delivery core, each mapping to its database table.
//!
//! - **Identity**: a stable account reference, created externally
//! - **Conversation**: a 1:1 pair or explicit group sharing a history
//! - **Message**: one message with per-recipient delivery receipts
//!
//! Each entity carries a repository trait implemented in the infrastructure
//! layer, following the dependency inversion principle.

mod conversation;
mod identity;
mod message;

pub use conversation::{Conversation, ConversationKind, ConversationRepository};

pub use identity::{Identity, IdentityRepository};

pub use message::{
    DeliveryStatus, InsertOutcome, Message, MessageRecord, MessageRepository, PendingDelivery,
    Receipt, ReceiptSummary, SeenReceipt,
};
