//! Request/response body schema node.
//!
//! JSON media types are decoded and profiled structurally; everything else is
//! fingerprinted as free text. Both halves live in one node because a single
//! endpoint can serve either, depending on the exchange.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::error::Result;
use crate::profile::{
    Criteria, Pile, SimpleValCriteria, SimpleValPile, SimpleValProfile, StructuredCriteria,
    StructuredPile, StructuredProfile,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyProfile {
    structured: Option<StructuredProfile>,
    unstructured: Option<SimpleValProfile>,
}

impl BodyProfile {
    /// Profile a body. `is_json` comes from the exchange's media type.
    ///
    /// A declared-JSON body that fails to decode is a typed error; the gate
    /// converts it to a generic blocked outcome rather than guessing a shape.
    pub fn from_bytes(bytes: &[u8], is_json: bool) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        if is_json {
            Ok(BodyProfile {
                structured: Some(StructuredProfile::from_json(bytes)?),
                unstructured: None,
            })
        } else {
            Ok(BodyProfile {
                structured: None,
                unstructured: Some(SimpleValProfile::from_str(
                    &String::from_utf8_lossy(bytes),
                )),
            })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_none() && self.unstructured.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPile {
    structured: StructuredPile,
    unstructured: SimpleValPile,
}

impl Pile for BodyPile {
    type Profile = BodyProfile;

    fn add(&mut self, profile: &BodyProfile) {
        if let Some(structured) = &profile.structured {
            self.structured.add(structured);
        }
        if let Some(unstructured) = &profile.unstructured {
            self.unstructured.add(unstructured);
        }
    }

    fn merge(&mut self, other: Self) {
        self.structured.merge(other.structured);
        self.unstructured.merge(other.unstructured);
    }

    fn clear(&mut self) {
        self.structured.clear();
        self.unstructured.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyCriteria {
    structured: StructuredCriteria,
    unstructured: SimpleValCriteria,
}

impl Criteria for BodyCriteria {
    type Profile = BodyProfile;
    type Pile = BodyPile;

    fn learn(&mut self, pile: &BodyPile) {
        self.structured.learn(&pile.structured);
        self.unstructured.learn(&pile.unstructured);
    }

    fn fuse(&mut self, other: &Self) {
        self.structured.fuse(&other.structured);
        self.unstructured.fuse(&other.unstructured);
    }

    fn decide(&self, profile: &BodyProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        if let Some(structured) = &profile.structured {
            builder.child("structured", self.structured.decide(structured));
        }
        if let Some(unstructured) = &profile.unstructured {
            builder.child("unstructured", self.unstructured.decide(unstructured));
        }
        builder.build()
    }
}
