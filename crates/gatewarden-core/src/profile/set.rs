//! Token-set learning.
//!
//! Used for small enumerable protocol vocabularies: methods, protocol
//! versions, status codes. An empty learned set passes everything -- the
//! opposite of the numeric kinds, where an empty boundary stays closed. A
//! set dimension that was never learned carries no signal, while a numeric
//! dimension that was never observed is evidence of absence.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};

/// Tokens observed in one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetProfile(pub Vec<String>);

impl SetProfile {
    pub fn single(token: impl Into<String>) -> Self {
        SetProfile(vec![token.into()])
    }
}

/// Deduplicated union of observed tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPile {
    tokens: BTreeSet<String>,
}

impl Pile for SetPile {
    type Profile = SetProfile;

    fn add(&mut self, profile: &SetProfile) {
        for token in &profile.0 {
            if !self.tokens.contains(token) {
                self.tokens.insert(token.clone());
            }
        }
    }

    fn merge(&mut self, other: Self) {
        self.tokens.extend(other.tokens);
    }

    fn clear(&mut self) {
        self.tokens.clear();
    }
}

/// Snapshot of the tokens seen at learn time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCriteria {
    tokens: BTreeSet<String>,
}

impl Criteria for SetCriteria {
    type Profile = SetProfile;
    type Pile = SetPile;

    fn learn(&mut self, pile: &SetPile) {
        self.tokens = pile.tokens.clone();
    }

    fn fuse(&mut self, other: &Self) {
        self.tokens.extend(other.tokens.iter().cloned());
    }

    fn decide(&self, profile: &SetProfile) -> Option<Decision> {
        if self.tokens.is_empty() {
            return None;
        }
        let mut builder = DecisionBuilder::new();
        for token in &profile.0 {
            if !self.tokens.contains(token) {
                builder.reason(1, format!("token {token:?} not learned"));
            }
        }
        builder.build()
    }
}
