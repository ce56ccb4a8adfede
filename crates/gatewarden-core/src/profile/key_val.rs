//! Dynamic-key map learning.
//!
//! Used for query strings and headers, where clients control the key space.
//! Keys present at the last learn each get their own string criteria; every
//! other key is judged against two shared aggregates, one for the key name
//! and one for the value. The aggregates bound memory against arbitrary
//! client-supplied keys; the known-key table itself grows with what learning
//! observes and carries no cardinality cap.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::simple_val::{SimpleValCriteria, SimpleValPile, SimpleValProfile};
use crate::profile::{Criteria, Pile};

/// Key/value fingerprints from one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValProfile {
    entries: BTreeMap<String, SimpleValProfile>,
}

impl KeyValProfile {
    /// Profile an iterator of key/value pairs. Repeated keys fold their
    /// values into one fingerprint.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut scanners: BTreeMap<String, crate::profile::simple_val::SimpleValScanner> =
            BTreeMap::new();
        for (key, value) in pairs {
            scanners.entry(key.to_string()).or_default().scan(value);
        }
        KeyValProfile {
            entries: scanners
                .into_iter()
                .map(|(k, scanner)| (k, scanner.finish()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-key piles across a population of exchanges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValPile {
    keys: BTreeMap<String, SimpleValPile>,
}

impl Pile for KeyValPile {
    type Profile = KeyValProfile;

    fn add(&mut self, profile: &KeyValProfile) {
        for (key, val) in &profile.entries {
            self.keys.entry(key.clone()).or_default().add(val);
        }
    }

    fn merge(&mut self, other: Self) {
        for (key, pile) in other.keys {
            match self.keys.entry(key) {
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    slot.get_mut().merge(pile)
                }
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(pile);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Known-key table plus shared aggregates for everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValCriteria {
    vals: BTreeMap<String, SimpleValCriteria>,
    other_keynames: SimpleValCriteria,
    other_vals: SimpleValCriteria,
}

impl Criteria for KeyValCriteria {
    type Profile = KeyValProfile;
    type Pile = KeyValPile;

    fn learn(&mut self, pile: &KeyValPile) {
        self.vals.clear();
        for (key, val_pile) in &pile.keys {
            let mut criteria = SimpleValCriteria::default();
            criteria.learn(val_pile);
            self.vals.insert(key.clone(), criteria);
        }
        // The aggregates stay closed after a plain learn; they only open up
        // through fusion with configured criteria.
        self.other_keynames = SimpleValCriteria::default();
        self.other_vals = SimpleValCriteria::default();
    }

    fn fuse(&mut self, other: &Self) {
        for (key, criteria) in &other.vals {
            match self.vals.get_mut(key) {
                Some(existing) => existing.fuse(criteria),
                None => {
                    self.vals.insert(key.clone(), criteria.clone());
                }
            }
        }
        self.other_keynames.fuse(&other.other_keynames);
        self.other_vals.fuse(&other.other_vals);
    }

    fn decide(&self, profile: &KeyValProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        for (key, val) in &profile.entries {
            match self.vals.get(key) {
                Some(criteria) => builder.child(key, criteria.decide(val)),
                None => {
                    let mut unknown = DecisionBuilder::new();
                    unknown.child(
                        "keyname",
                        self.other_keynames.decide(&SimpleValProfile::from_str(key)),
                    );
                    unknown.child("value", self.other_vals.decide(val));
                    builder.child(key, unknown.build());
                }
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learned(observations: &[&[(&str, &str)]]) -> KeyValCriteria {
        let mut pile = KeyValPile::default();
        for pairs in observations {
            pile.add(&KeyValProfile::from_pairs(pairs.iter().copied()));
        }
        let mut criteria = KeyValCriteria::default();
        criteria.learn(&pile);
        criteria
    }

    #[test]
    fn test_known_keys_judged_individually() {
        let criteria = learned(&[&[("user", "alice"), ("page", "12")]]);
        assert!(criteria
            .decide(&KeyValProfile::from_pairs([("user", "bob"), ("page", "7")]))
            .is_none());
        // A numeric user value breaks the learned shape for that key.
        assert!(criteria
            .decide(&KeyValProfile::from_pairs([("user", "alice'; --")]))
            .is_some());
    }

    #[test]
    fn test_unknown_key_hits_other_aggregates() {
        let criteria = learned(&[&[("user", "alice")]]);
        let decision = criteria
            .decide(&KeyValProfile::from_pairs([("debug", "1")]))
            .expect("unknown key should be reported");
        assert!(decision.children.contains_key("debug"));
    }

    #[test]
    fn test_missing_known_key_passes() {
        let criteria = learned(&[&[("user", "alice"), ("page", "12")]]);
        assert!(criteria
            .decide(&KeyValProfile::from_pairs([("user", "carol")]))
            .is_none());
    }

    #[test]
    fn test_repeated_keys_fold_values() {
        let profile = KeyValProfile::from_pairs([("tag", "a"), ("tag", "b")]);
        assert_eq!(profile.entries.len(), 1);
    }

    #[test]
    fn test_fuse_merges_known_tables_key_by_key() {
        let mut a = learned(&[&[("user", "alice")]]);
        let b = learned(&[&[("page", "3")]]);
        a.fuse(&b);
        assert!(a
            .decide(&KeyValProfile::from_pairs([("user", "bob"), ("page", "9")]))
            .is_none());
    }

    #[test]
    fn test_serde_preserves_decide() {
        let criteria = learned(&[&[("user", "alice")]]);
        let json = serde_json::to_string(&criteria).unwrap();
        let back: KeyValCriteria = serde_json::from_str(&json).unwrap();
        assert!(back
            .decide(&KeyValProfile::from_pairs([("user", "bob")]))
            .is_none());
        assert!(back
            .decide(&KeyValProfile::from_pairs([("evil", "<script>")]))
            .is_some());
    }
}
