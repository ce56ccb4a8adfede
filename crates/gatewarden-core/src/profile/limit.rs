//! Exponentially bucketed upper limits.
//!
//! Raw counts are squeezed through [`bucket`] before they enter a profile:
//! exact for 0..=15, geometrically coarsening above, capped at 255. Large
//! noisy counts therefore stop generating a new bucket per unit change,
//! while small-scale ranges stay tight. The criteria track a running max.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};

/// Map a raw count to its bucket.
///
/// While the remainder is at least 16: subtract 16, add 16 to the base, halve
/// the remainder. The bucket is base + final remainder, capped at 255.
pub fn bucket(raw: usize) -> u8 {
    let mut base = 0usize;
    let mut remainder = raw;
    while remainder >= 16 {
        remainder -= 16;
        base += 16;
        remainder /= 2;
    }
    (base + remainder).min(255) as u8
}

/// One bucketed observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitProfile(pub u8);

impl From<usize> for LimitProfile {
    fn from(raw: usize) -> Self {
        LimitProfile(bucket(raw))
    }
}

/// Running max over bucketed observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPile {
    max: u8,
}

impl Pile for LimitPile {
    type Profile = LimitProfile;

    fn add(&mut self, profile: &LimitProfile) {
        self.max = self.max.max(profile.0);
    }

    fn merge(&mut self, other: Self) {
        self.max = self.max.max(other.max);
    }

    fn clear(&mut self) {
        self.max = 0;
    }
}

/// Learned upper bound. A fresh criteria (max 0) rejects any nonzero profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCriteria {
    max: u8,
}

impl Criteria for LimitCriteria {
    type Profile = LimitProfile;
    type Pile = LimitPile;

    fn learn(&mut self, pile: &LimitPile) {
        self.max = pile.max;
    }

    fn fuse(&mut self, other: &Self) {
        self.max = self.max.max(other.max);
    }

    fn decide(&self, profile: &LimitProfile) -> Option<Decision> {
        if profile.0 <= self.max {
            return None;
        }
        let mut builder = DecisionBuilder::new();
        builder.reason(
            1,
            format!("limit bucket {} above learned max {}", profile.0, self.max),
        );
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_identity_below_sixteen() {
        for raw in 0..16usize {
            assert_eq!(bucket(raw) as usize, raw);
        }
    }

    #[test]
    fn test_bucket_monotone_and_capped() {
        let mut prev = 0u8;
        for raw in 0..100_000usize {
            let b = bucket(raw);
            assert!(b >= prev, "bucket({raw}) = {b} dropped below {prev}");
            assert!(b <= 255);
            prev = b;
        }
        assert_eq!(bucket(usize::MAX >> 8), 255);
    }

    #[test]
    fn test_coarsening_above_sixteen() {
        // 16 and 17 land in the same bucket; a unit change no longer matters.
        assert_eq!(bucket(16), bucket(17));
        assert!(bucket(1000) < 255);
    }

    #[test]
    fn test_learned_data_always_passes() {
        let mut pile = LimitPile::default();
        for raw in [3usize, 90, 4000] {
            pile.add(&LimitProfile::from(raw));
        }
        let mut criteria = LimitCriteria::default();
        criteria.learn(&pile);
        for raw in [3usize, 90, 4000] {
            assert!(criteria.decide(&LimitProfile::from(raw)).is_none());
        }
        assert!(criteria.decide(&LimitProfile::from(100_000)).is_some());
    }

    #[test]
    fn test_empty_learn_rejects_nonzero() {
        let criteria = LimitCriteria::default();
        assert!(criteria.decide(&LimitProfile::from(0)).is_none());
        assert!(criteria.decide(&LimitProfile::from(1)).is_some());
    }

    #[test]
    fn test_fuse_idempotent() {
        let mut pile = LimitPile::default();
        pile.add(&LimitProfile::from(50));
        let mut a = LimitCriteria::default();
        a.learn(&pile);
        let b = a;
        let mut fused = a;
        fused.fuse(&b);
        fused.fuse(&b);
        assert_eq!(fused, a);
    }
}
