//! Recursive JSON schema learning.
//!
//! Decoded JSON values are profiled by shape: objects map to per-field child
//! nodes, arrays fold every element into one position-insensitive string
//! fingerprint, and scalars are fingerprinted through their textual form.
//! Criteria carry the discovered kind; a kind mismatch at decide time is a
//! violation -- unless the node was ever fused across differing kinds, which
//! marks it polymorphic and disables structural checking for that subtree
//! rather than forming a union type.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::{Decision, DecisionBuilder};
use crate::error::{CoreError, Result};
use crate::profile::simple_val::{
    SimpleValCriteria, SimpleValPile, SimpleValProfile, SimpleValScanner,
};
use crate::profile::{Criteria, Pile};

/// Discovered shape of a JSON node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum StructuredKind {
    #[default]
    Empty,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl StructuredKind {
    fn of(value: &Value) -> StructuredKind {
        match value {
            Value::Null => StructuredKind::Empty,
            Value::Bool(_) => StructuredKind::Boolean,
            Value::Number(_) => StructuredKind::Number,
            Value::String(_) => StructuredKind::String,
            Value::Array(_) => StructuredKind::Array,
            Value::Object(_) => StructuredKind::Object,
        }
    }
}

/// Render a JSON value to the text that gets fingerprinted.
///
/// Scalars use their literal form; nested composites inside arrays are
/// flattened to their canonical JSON text, so arrays of objects still fold
/// into the one element fingerprint.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fingerprint of one decoded JSON value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredProfile {
    kind: StructuredKind,
    /// Scalar fingerprint (scalar kinds) or folded element fingerprint (arrays).
    val: Option<SimpleValProfile>,
    /// Per-field children (objects only).
    fields: BTreeMap<String, StructuredProfile>,
}

impl StructuredProfile {
    /// Profile a decoded JSON value.
    ///
    /// Returns an error only for shapes the engine does not model; valid
    /// JSON always profiles.
    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = StructuredKind::of(value);
        match value {
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, child) in map {
                    fields.insert(key.clone(), StructuredProfile::from_value(child)?);
                }
                Ok(StructuredProfile {
                    kind,
                    val: None,
                    fields,
                })
            }
            Value::Array(items) => {
                let mut scanner = SimpleValScanner::default();
                for item in items {
                    scanner.scan(&scalar_text(item));
                }
                Ok(StructuredProfile {
                    kind,
                    val: Some(scanner.finish()),
                    fields: BTreeMap::new(),
                })
            }
            _ => Ok(StructuredProfile {
                kind,
                val: Some(SimpleValProfile::from_str(&scalar_text(value))),
                fields: BTreeMap::new(),
            }),
        }
    }

    /// Profile a raw JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::UnsupportedInput(format!("invalid JSON body: {e}")))?;
        Self::from_value(&value)
    }

    pub fn kind(&self) -> StructuredKind {
        self.kind
    }
}

/// Accumulator over a population of JSON profiles for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPile {
    kinds: BTreeSet<StructuredKind>,
    val: SimpleValPile,
    fields: BTreeMap<String, StructuredPile>,
}

impl Pile for StructuredPile {
    type Profile = StructuredProfile;

    fn add(&mut self, profile: &StructuredProfile) {
        self.kinds.insert(profile.kind);
        if let Some(val) = &profile.val {
            self.val.add(val);
        }
        for (key, child) in &profile.fields {
            self.fields.entry(key.clone()).or_default().add(child);
        }
    }

    fn merge(&mut self, other: Self) {
        self.kinds.extend(other.kinds);
        self.val.merge(other.val);
        for (key, pile) in other.fields {
            match self.fields.entry(key) {
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
        *self = Self::default();
    }
}

/// Learned boundary for one JSON node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredCriteria {
    kind: StructuredKind,
    /// Set on fuse across differing kinds, or on a mixed-kind learn. Once
    /// set, kind mismatches below this node are unconditionally accepted.
    polymorphic: bool,
    val: SimpleValCriteria,
    fields: BTreeMap<String, StructuredCriteria>,
}

impl Criteria for StructuredCriteria {
    type Profile = StructuredProfile;
    type Pile = StructuredPile;

    fn learn(&mut self, pile: &StructuredPile) {
        *self = Self::default();
        self.kind = pile.kinds.iter().next().copied().unwrap_or_default();
        self.polymorphic = pile.kinds.len() > 1;
        self.val.learn(&pile.val);
        for (key, child_pile) in &pile.fields {
            let mut child = StructuredCriteria::default();
            child.learn(child_pile);
            self.fields.insert(key.clone(), child);
        }
    }

    fn fuse(&mut self, other: &Self) {
        if self.kind != other.kind {
            self.polymorphic = true;
        }
        self.polymorphic |= other.polymorphic;
        self.val.fuse(&other.val);
        for (key, child) in &other.fields {
            match self.fields.get_mut(key) {
                Some(existing) => existing.fuse(child),
                None => {
                    self.fields.insert(key.clone(), child.clone());
                }
            }
        }
    }

    fn decide(&self, profile: &StructuredProfile) -> Option<Decision> {
        if self.polymorphic {
            return None;
        }
        if profile.kind != self.kind {
            let mut builder = DecisionBuilder::new();
            builder.reason(
                2,
                format!("kind {:?} does not match learned {:?}", profile.kind, self.kind),
            );
            return builder.build();
        }
        let mut builder = DecisionBuilder::new();
        if let Some(val) = &profile.val {
            builder.child("val", self.val.decide(val));
        }
        for (key, child) in &profile.fields {
            match self.fields.get(key) {
                Some(criteria) => builder.child(key, criteria.decide(child)),
                None => builder.reason(1, format!("unexpected field {key:?}")),
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn learned(values: &[Value]) -> StructuredCriteria {
        let mut pile = StructuredPile::default();
        for v in values {
            pile.add(&StructuredProfile::from_value(v).unwrap());
        }
        let mut criteria = StructuredCriteria::default();
        criteria.learn(&pile);
        criteria
    }

    #[test]
    fn test_object_schema_learned_per_field() {
        let criteria = learned(&[json!({"name": "alice", "age": 30})]);
        let ok = StructuredProfile::from_value(&json!({"name": "bob", "age": 4})).unwrap();
        assert!(criteria.decide(&ok).is_none());

        let bad = StructuredProfile::from_value(&json!({"name": "bob", "age": "old"})).unwrap();
        assert!(criteria.decide(&bad).is_some());
    }

    #[test]
    fn test_unexpected_field_reported() {
        let criteria = learned(&[json!({"name": "alice"})]);
        let extra = StructuredProfile::from_value(&json!({"name": "bob", "admin": true})).unwrap();
        let decision = criteria.decide(&extra).unwrap();
        assert!(decision.reasons.iter().any(|r| r.contains("admin")));
    }

    #[test]
    fn test_missing_field_passes() {
        let criteria = learned(&[json!({"name": "alice", "age": 30})]);
        let partial = StructuredProfile::from_value(&json!({"name": "bob"})).unwrap();
        assert!(criteria.decide(&partial).is_none());
    }

    #[test]
    fn test_array_elements_fold_position_insensitive() {
        let criteria = learned(&[json!(["alpha", "beta", "gamma"])]);
        let shuffled = StructuredProfile::from_value(&json!(["beta", "gamma", "alpha"])).unwrap();
        assert!(criteria.decide(&shuffled).is_none());
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let criteria = learned(&[json!({"a": 1})]);
        let scalar = StructuredProfile::from_value(&json!("just text")).unwrap();
        assert!(criteria.decide(&scalar).is_some());
    }

    #[test]
    fn test_fuse_across_kinds_marks_polymorphic() {
        let mut a = learned(&[json!("text")]);
        let b = learned(&[json!(17)]);
        a.fuse(&b);
        // After heterogeneous fusion, any kind passes this node.
        let obj = StructuredProfile::from_value(&json!({"x": 1})).unwrap();
        assert!(a.decide(&obj).is_none());
    }

    #[test]
    fn test_invalid_json_is_typed_error() {
        assert!(StructuredProfile::from_json(b"{not json").is_err());
    }

    #[test]
    fn test_serde_preserves_decide() {
        let criteria = learned(&[json!({"name": "alice"})]);
        let json_text = serde_json::to_string(&criteria).unwrap();
        let back: StructuredCriteria = serde_json::from_str(&json_text).unwrap();
        let ok = StructuredProfile::from_value(&json!({"name": "bob"})).unwrap();
        assert!(back.decide(&ok).is_none());
    }
}
