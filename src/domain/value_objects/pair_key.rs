//! Canonical identity-pair key for direct conversations.
//!
//! The key is order-independent: `PairKey::new(a, b) == PairKey::new(b, a)`,
//! so either party's first message resolves to the same conversation row.

use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Sorted identity pair identifying a direct conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    low: i64,
    high: i64,
}

impl PairKey {
    /// Canonicalize a pair of identities. Rejects self-pairs.
    pub fn new(a: i64, b: i64) -> Result<Self, AppError> {
        if a == b {
            return Err(AppError::BadRequest(
                "Cannot open a direct conversation with yourself".into(),
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    /// Reconstruct from already-sorted database columns.
    pub fn from_sorted(low: i64, high: i64) -> Self {
        debug_assert!(low < high);
        Self { low, high }
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    /// Both members of the pair.
    pub fn members(&self) -> [i64; 2] {
        [self.low, self.high]
    }

    /// The member that is not `identity`, if `identity` is in the pair.
    pub fn other(&self, identity: i64) -> Option<i64> {
        if identity == self.low {
            Some(self.high)
        } else if identity == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent() {
        let ab = PairKey::new(7, 3).unwrap();
        let ba = PairKey::new(3, 7).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.low(), 3);
        assert_eq!(ab.high(), 7);
    }

    #[test]
    fn self_pair_is_rejected() {
        assert!(PairKey::new(5, 5).is_err());
    }

    #[test]
    fn other_member_lookup() {
        let key = PairKey::new(1, 2).unwrap();
        assert_eq!(key.other(1), Some(2));
        assert_eq!(key.other(2), Some(1));
        assert_eq!(key.other(3), None);
    }
}
