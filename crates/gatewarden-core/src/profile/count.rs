//! Bucketed integer ranges.
//!
//! Counts are small integers (0-255) where zero is the "absent" sentinel and
//! always passes. Learning produces the tightest interval enclosing every
//! nonzero observation; learning from an empty pile produces an empty
//! interval list, which rejects every nonzero value. That asymmetry with the
//! set kinds is intentional: an unobserved count dimension stays closed.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};

/// One observed count. Zero means the dimension was absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountProfile(pub u8);

impl From<usize> for CountProfile {
    fn from(raw: usize) -> Self {
        CountProfile(raw.min(255) as u8)
    }
}

/// Min/max accumulator over nonzero observations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPile {
    seen: bool,
    min: u8,
    max: u8,
}

impl Pile for CountPile {
    type Profile = CountProfile;

    fn add(&mut self, profile: &CountProfile) {
        if profile.0 == 0 {
            return;
        }
        if self.seen {
            self.min = self.min.min(profile.0);
            self.max = self.max.max(profile.0);
        } else {
            self.seen = true;
            self.min = profile.0;
            self.max = profile.0;
        }
    }

    fn merge(&mut self, other: Self) {
        if other.seen {
            if self.seen {
                self.min = self.min.min(other.min);
                self.max = self.max.max(other.max);
            } else {
                *self = other;
            }
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Learned or configured list of allowed `[min, max]` intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCriteria {
    intervals: Vec<(u8, u8)>,
}

impl Criteria for CountCriteria {
    type Profile = CountProfile;
    type Pile = CountPile;

    fn learn(&mut self, pile: &CountPile) {
        self.intervals.clear();
        if pile.seen {
            self.intervals.push((pile.min, pile.max));
        }
    }

    fn fuse(&mut self, other: &Self) {
        for interval in &other.intervals {
            if !self.intervals.contains(interval) {
                self.intervals.push(*interval);
            }
        }
    }

    fn decide(&self, profile: &CountProfile) -> Option<Decision> {
        if profile.0 == 0 {
            return None;
        }
        if self
            .intervals
            .iter()
            .any(|&(min, max)| profile.0 >= min && profile.0 <= max)
        {
            return None;
        }
        let mut builder = DecisionBuilder::new();
        builder.reason(
            1,
            format!("count {} outside learned intervals {:?}", profile.0, self.intervals),
        );
        builder.build()
    }
}
