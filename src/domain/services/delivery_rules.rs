//! Pure delivery-status transition rules.
//!
//! The receipt lifecycle is `sent → delivered → seen`, forward-only. These
//! functions decide transitions without touching storage or transport, so
//! the pipeline's state machine is testable in isolation.

use crate::domain::entities::DeliveryStatus;

/// Result of asking to move a receipt to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Legal forward move; holds each intermediate status in order, ending
    /// at the target (e.g. sent → seen yields [delivered, seen]).
    Stepped(Vec<DeliveryStatus>),
    /// Already at or past the target; nothing to emit.
    Unchanged,
}

/// Compute the transition from `current` to `target`.
///
/// A receipt never regresses: asking for an earlier status is reported as
/// `Unchanged` rather than an error, which makes replayed acknowledgments
/// harmless.
pub fn advance(current: DeliveryStatus, target: DeliveryStatus) -> Advance {
    if target <= current {
        return Advance::Unchanged;
    }

    let ladder = [
        DeliveryStatus::Sent,
        DeliveryStatus::Delivered,
        DeliveryStatus::Seen,
    ];
    let steps = ladder
        .into_iter()
        .filter(|s| *s > current && *s <= target)
        .collect();
    Advance::Stepped(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use DeliveryStatus::{Delivered, Seen, Sent};

    #[test_case(Sent, Delivered => vec![Delivered]; "sent to delivered")]
    #[test_case(Sent, Seen => vec![Delivered, Seen]; "sent to seen expands both steps")]
    #[test_case(Delivered, Seen => vec![Seen]; "delivered to seen")]
    fn forward_moves_step_through_every_state(
        current: DeliveryStatus,
        target: DeliveryStatus,
    ) -> Vec<DeliveryStatus> {
        match advance(current, target) {
            Advance::Stepped(steps) => steps,
            Advance::Unchanged => panic!("expected a forward move"),
        }
    }

    #[test_case(Delivered, Sent; "delivered never regresses to sent")]
    #[test_case(Seen, Delivered; "seen never regresses to delivered")]
    #[test_case(Seen, Sent; "seen never regresses to sent")]
    #[test_case(Seen, Seen; "terminal state is idempotent")]
    #[test_case(Sent, Sent; "no-op at sent")]
    fn regressions_and_replays_are_unchanged(current: DeliveryStatus, target: DeliveryStatus) {
        assert_eq!(advance(current, target), Advance::Unchanged);
    }
}
