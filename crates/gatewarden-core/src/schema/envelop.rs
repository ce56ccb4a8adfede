//! Timing envelope schema node.
//!
//! Two Limit-bucketed durations in whole seconds: time until the response
//! arrived and time until the exchange completed. Long-running requests are
//! re-screened against these mid-flight by the session ticker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, LimitCriteria, LimitPile, LimitProfile, Pile};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopProfile {
    response_time: LimitProfile,
    completion_time: LimitProfile,
}

impl EnvelopProfile {
    pub fn new(response_time: Duration, completion_time: Duration) -> Self {
        EnvelopProfile {
            response_time: LimitProfile::from(response_time.as_secs() as usize),
            completion_time: LimitProfile::from(completion_time.as_secs() as usize),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopPile {
    response_time: LimitPile,
    completion_time: LimitPile,
}

impl Pile for EnvelopPile {
    type Profile = EnvelopProfile;

    fn add(&mut self, profile: &EnvelopProfile) {
        self.response_time.add(&profile.response_time);
        self.completion_time.add(&profile.completion_time);
    }

    fn merge(&mut self, other: Self) {
        self.response_time.merge(other.response_time);
        self.completion_time.merge(other.completion_time);
    }

    fn clear(&mut self) {
        self.response_time.clear();
        self.completion_time.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopCriteria {
    response_time: LimitCriteria,
    completion_time: LimitCriteria,
}

impl Criteria for EnvelopCriteria {
    type Profile = EnvelopProfile;
    type Pile = EnvelopPile;

    fn learn(&mut self, pile: &EnvelopPile) {
        self.response_time.learn(&pile.response_time);
        self.completion_time.learn(&pile.completion_time);
    }

    fn fuse(&mut self, other: &Self) {
        self.response_time.fuse(&other.response_time);
        self.completion_time.fuse(&other.completion_time);
    }

    fn decide(&self, profile: &EnvelopProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        builder.child(
            "response-time",
            self.response_time.decide(&profile.response_time),
        );
        builder.child(
            "completion-time",
            self.completion_time.decide(&profile.completion_time),
        );
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_exchange_reported() {
        let mut pile = EnvelopPile::default();
        pile.add(&EnvelopProfile::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        let mut criteria = EnvelopCriteria::default();
        criteria.learn(&pile);

        assert!(criteria
            .decide(&EnvelopProfile::new(
                Duration::from_secs(1),
                Duration::from_secs(1),
            ))
            .is_none());
        assert!(criteria
            .decide(&EnvelopProfile::new(
                Duration::from_secs(600),
                Duration::from_secs(600),
            ))
            .is_some());
    }
}
