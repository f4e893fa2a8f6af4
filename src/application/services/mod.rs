//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! - **DeliveryService**: the delivery pipeline (send, acknowledge, backlog
//!   flush, history, reply resolution)
//! - **PresenceService**: online/offline edges and typing indicators
//!
//! Both services emit routed [`Outbound`](crate::application::events::Outbound)
//! events into a channel owned by the transport dispatcher, so they are
//! fully testable without a live socket attached.

pub mod delivery_service;
pub mod presence_service;

pub use delivery_service::{
    DeliveryError, DeliveryService, DeliveryTarget, SendMessageDto, MAX_HISTORY_LIMIT,
};
pub use presence_service::PresenceService;

/// Live-connection view consumed by the delivery pipeline.
///
/// Implemented by the session registry; tests substitute a fixed roster.
/// Collapses multi-device sessions to an identity-level answer — delivery
/// status is tracked per identity, never per device.
pub trait LiveRoster: Send + Sync {
    /// Whether the identity has at least one live session.
    fn is_online(&self, identity: i64) -> bool;

    /// Number of live sessions the identity currently owns.
    fn live_session_count(&self, identity: i64) -> usize;
}
