//! Service response schema node.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{
    Criteria, KeyValCriteria, KeyValPile, KeyValProfile, LimitCriteria, LimitPile, LimitProfile,
    Pile, SetCriteria, SetPile, SetProfile,
};

/// Raw response data handed to the profiler by the gate.
#[derive(Debug, Clone, Default)]
pub struct RespFacts {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespProfile {
    status: SetProfile,
    headers: KeyValProfile,
    content_length: LimitProfile,
}

impl RespProfile {
    pub fn from_facts(facts: &RespFacts) -> Self {
        RespProfile {
            status: SetProfile::single(facts.status.to_string()),
            headers: KeyValProfile::from_pairs(
                facts.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            content_length: LimitProfile::from(facts.content_length),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespPile {
    status: SetPile,
    headers: KeyValPile,
    content_length: LimitPile,
}

impl Pile for RespPile {
    type Profile = RespProfile;

    fn add(&mut self, profile: &RespProfile) {
        self.status.add(&profile.status);
        self.headers.add(&profile.headers);
        self.content_length.add(&profile.content_length);
    }

    fn merge(&mut self, other: Self) {
        self.status.merge(other.status);
        self.headers.merge(other.headers);
        self.content_length.merge(other.content_length);
    }

    fn clear(&mut self) {
        self.status.clear();
        self.headers.clear();
        self.content_length.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespCriteria {
    status: SetCriteria,
    headers: KeyValCriteria,
    content_length: LimitCriteria,
}

impl Criteria for RespCriteria {
    type Profile = RespProfile;
    type Pile = RespPile;

    fn learn(&mut self, pile: &RespPile) {
        self.status.learn(&pile.status);
        self.headers.learn(&pile.headers);
        self.content_length.learn(&pile.content_length);
    }

    fn fuse(&mut self, other: &Self) {
        self.status.fuse(&other.status);
        self.headers.fuse(&other.headers);
        self.content_length.fuse(&other.content_length);
    }

    fn decide(&self, profile: &RespProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        builder.child("status", self.status.decide(&profile.status));
        builder.child("headers", self.headers.decide(&profile.headers));
        builder.child(
            "content-length",
            self.content_length.decide(&profile.content_length),
        );
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(status: u16, content_length: usize) -> RespFacts {
        RespFacts {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            content_length,
        }
    }

    #[test]
    fn test_learned_status_passes_unlearned_fails() {
        let mut pile = RespPile::default();
        pile.add(&RespProfile::from_facts(&facts(200, 120)));
        let mut criteria = RespCriteria::default();
        criteria.learn(&pile);

        assert!(criteria
            .decide(&RespProfile::from_facts(&facts(200, 80)))
            .is_none());
        let decision = criteria
            .decide(&RespProfile::from_facts(&facts(500, 80)))
            .expect("500 was never learned");
        assert!(decision.children.contains_key("status"));
    }

    #[test]
    fn test_oversized_response_reported() {
        let mut pile = RespPile::default();
        pile.add(&RespProfile::from_facts(&facts(200, 100)));
        let mut criteria = RespCriteria::default();
        criteria.learn(&pile);

        let decision = criteria
            .decide(&RespProfile::from_facts(&facts(200, 1_000_000)))
            .expect("response far larger than anything learned");
        assert!(decision.children.contains_key("content-length"));
    }
}
