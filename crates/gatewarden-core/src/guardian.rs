//! The persisted Guardian document for one protected service.
//!
//! A Guardian holds two boundaries of different provenance -- Configured
//! (externally authored) and Learned (produced by the learning cycle) -- and
//! the Control knobs that decide how the gate uses them.

use serde::{Deserialize, Serialize};

use crate::schema::SessionDataCriteria;

/// Behavior knobs for one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Surface Decisions to the operator alert channel.
    #[serde(default)]
    pub alert: bool,
    /// Enforce: reject exchanges once an alert exists.
    #[serde(default)]
    pub block: bool,
    /// Fold clean traffic into future learning.
    #[serde(default)]
    pub learn: bool,
    /// Fold alerted traffic into learning too (bootstrap mode).
    #[serde(default)]
    pub force: bool,
    /// Select the Learned boundary as active instead of Configured.
    #[serde(default)]
    pub auto: bool,
}

impl Default for Control {
    fn default() -> Self {
        Guardian::fallback().control
    }
}

/// Persisted {Configured, Learned, Control} document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guardian {
    #[serde(default)]
    pub configured: Option<SessionDataCriteria>,
    #[serde(default)]
    pub learned: Option<SessionDataCriteria>,
    #[serde(default)]
    pub control: Control,
}

impl Guardian {
    /// The maximally automated default used when the backend has no record:
    /// learn everything, alert but never block.
    pub fn fallback() -> Self {
        Guardian {
            configured: None,
            learned: None,
            control: Control {
                alert: true,
                block: false,
                learn: true,
                force: true,
                auto: true,
            },
        }
    }

    /// The boundary the gate screens against, per `control.auto`.
    pub fn active(&self) -> Option<&SessionDataCriteria> {
        if self.control.auto {
            self.learned.as_ref()
        } else {
            self.configured.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Criteria, Pile};
    use crate::schema::{SessionDataPile, SessionDataProfile};

    #[test]
    fn test_fallback_is_learn_everything_block_nothing() {
        let guardian = Guardian::fallback();
        assert!(guardian.control.alert);
        assert!(guardian.control.learn);
        assert!(guardian.control.force);
        assert!(guardian.control.auto);
        assert!(!guardian.control.block);
    }

    #[test]
    fn test_auto_selects_learned() {
        let mut learned = SessionDataCriteria::default();
        let mut pile = SessionDataPile::default();
        pile.add(&SessionDataProfile::default());
        learned.learn(&pile);

        let mut guardian = Guardian::fallback();
        guardian.learned = Some(learned.clone());
        guardian.configured = Some(SessionDataCriteria::default());
        assert_eq!(guardian.active(), Some(&learned));

        guardian.control.auto = false;
        assert_eq!(guardian.active(), Some(&SessionDataCriteria::default()));
    }

    #[test]
    fn test_serde_round_trip() {
        let guardian = Guardian::fallback();
        let json = serde_json::to_string(&guardian).unwrap();
        let back: Guardian = serde_json::from_str(&json).unwrap();
        assert_eq!(guardian, back);
    }
}
