//! Gate settings, loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level gatewarden configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSettings {
    /// Identity of the protected service, used as the backend record key.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// Learning backend base URL. Empty means standalone (local learning only).
    #[serde(default)]
    pub backend_url: String,

    /// Seconds between in-flight re-screens of a long-lived session.
    #[serde(default = "default_session_tick_secs")]
    pub session_tick_secs: u64,

    /// Seconds between pod peer-monitor sweeps.
    #[serde(default = "default_pod_monitor_secs")]
    pub pod_monitor_secs: u64,

    /// Seconds between main-loop ticks.
    #[serde(default = "default_gate_tick_secs")]
    pub gate_tick_secs: u64,

    /// Sync when the outgoing pile exceeds this fraction of the learned
    /// sample count.
    #[serde(default = "default_pile_fraction")]
    pub pile_sync_fraction: f64,

    /// Sync once at least this many profiles piled up, regardless of fraction.
    #[serde(default = "default_pile_floor")]
    pub pile_sync_floor: u64,

    /// Sync when this many alerts are pending.
    #[serde(default = "default_alert_cap")]
    pub alert_batch_cap: usize,

    /// Sync after this many main-loop ticks without one.
    #[serde(default = "default_max_skipped")]
    pub max_skipped_ticks: u32,

    /// Minimum seconds between forced syncs.
    #[serde(default = "default_min_sync_secs")]
    pub min_sync_interval_secs: u64,

    /// Largest body the gate will buffer and profile, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_service_id() -> String {
    "default".to_string()
}

fn default_session_tick_secs() -> u64 {
    5
}

fn default_pod_monitor_secs() -> u64 {
    30
}

fn default_gate_tick_secs() -> u64 {
    10
}

fn default_pile_fraction() -> f64 {
    0.1
}

fn default_pile_floor() -> u64 {
    100
}

fn default_alert_cap() -> usize {
    32
}

fn default_max_skipped() -> u32 {
    30
}

fn default_min_sync_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    1 << 20
}

impl Default for GateSettings {
    fn default() -> Self {
        GateSettings {
            service_id: default_service_id(),
            backend_url: String::new(),
            session_tick_secs: default_session_tick_secs(),
            pod_monitor_secs: default_pod_monitor_secs(),
            gate_tick_secs: default_gate_tick_secs(),
            pile_sync_fraction: default_pile_fraction(),
            pile_sync_floor: default_pile_floor(),
            alert_batch_cap: default_alert_cap(),
            max_skipped_ticks: default_max_skipped(),
            min_sync_interval_secs: default_min_sync_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GateSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: GateSettings = toml::from_str(&contents)?;
        Ok(settings)
    }

    pub fn session_tick(&self) -> Duration {
        Duration::from_secs(self.session_tick_secs)
    }

    pub fn pod_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.pod_monitor_secs)
    }

    pub fn gate_tick(&self) -> Duration {
        Duration::from_secs(self.gate_tick_secs)
    }

    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_secs(self.min_sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = GateSettings::default();
        assert_eq!(settings.service_id, "default");
        assert_eq!(settings.alert_batch_cap, 32);
        assert!(settings.backend_url.is_empty());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: GateSettings = toml::from_str(
            r#"
            service_id = "billing"
            backend_url = "http://guardian.svc:8013"
            alert_batch_cap = 8
            "#,
        )
        .unwrap();
        assert_eq!(settings.service_id, "billing");
        assert_eq!(settings.alert_batch_cap, 8);
        assert_eq!(settings.max_skipped_ticks, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service_id = \"orders\"").unwrap();
        let settings = GateSettings::load(file.path()).unwrap();
        assert_eq!(settings.service_id, "orders");
    }
}
