//! Learning-backend client.
//!
//! The gate exchanges state with a shared learning backend: it submits its
//! outgoing pile and pending alerts and loads back the authoritative
//! Guardian. Every call is best-effort from the gate's point of view --
//! failures are logged and retried next cycle, never surfaced on the request
//! path. Loading never permanently fails: when the backend has no record the
//! maximally automated fallback Guardian applies.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gatewarden_core::profile::{Criteria, Pile};
use gatewarden_core::schema::{SessionDataCriteria, SessionDataPile};
use gatewarden_core::{Decision, Guardian};

/// One surfaced Decision, stamped for the operator channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub service_id: String,
    pub decision: Decision,
}

impl AlertRecord {
    pub fn new(service_id: &str, decision: Decision) -> Self {
        AlertRecord {
            timestamp: Utc::now(),
            service_id: service_id.to_string(),
            decision,
        }
    }
}

/// External persistence/learning collaborator.
#[async_trait]
pub trait GuardianBackend: Send + Sync {
    /// Load the authoritative Guardian for a service. Implementations fall
    /// back to [`Guardian::fallback`] when no record exists; only transport
    /// failures are errors.
    async fn load_guardian(&self, service_id: &str) -> anyhow::Result<Guardian>;

    async fn submit_pile(&self, service_id: &str, pile: SessionDataPile) -> anyhow::Result<()>;

    async fn submit_alerts(&self, service_id: &str, alerts: Vec<AlertRecord>)
        -> anyhow::Result<()>;
}

/// HTTP backend speaking JSON to a guardian service.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpBackend {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, kind: &str, service_id: &str) -> String {
        format!(
            "{}/{kind}/{service_id}",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl GuardianBackend for HttpBackend {
    async fn load_guardian(&self, service_id: &str) -> anyhow::Result<Guardian> {
        let resp = self
            .client
            .get(self.url("guardian", service_id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            info!(service_id, "no guardian record, using fallback");
            return Ok(Guardian::fallback());
        }
        let guardian: Guardian = resp.error_for_status()?.json().await?;
        Ok(guardian)
    }

    async fn submit_pile(&self, service_id: &str, pile: SessionDataPile) -> anyhow::Result<()> {
        debug!(service_id, count = pile.count(), "submitting pile");
        self.client
            .post(self.url("pile", service_id))
            .json(&pile)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn submit_alerts(
        &self,
        service_id: &str,
        alerts: Vec<AlertRecord>,
    ) -> anyhow::Result<()> {
        debug!(service_id, count = alerts.len(), "submitting alerts");
        self.client
            .post(self.url("alerts", service_id))
            .json(&alerts)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// In-process backend for standalone mode and tests.
///
/// Learns from every submitted pile immediately and serves the fused result
/// back as the Guardian's Learned criteria.
#[derive(Default)]
pub struct LocalBackend {
    inner: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    guardian: Option<Guardian>,
    pile: SessionDataPile,
    alerts: Vec<AlertRecord>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the guardian record, e.g. with configured criteria or control
    /// overrides.
    pub fn seed(&self, guardian: Guardian) {
        self.inner.lock().unwrap().guardian = Some(guardian);
    }

    /// Alerts received so far (test observability).
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.inner.lock().unwrap().alerts.clone()
    }
}

#[async_trait]
impl GuardianBackend for LocalBackend {
    async fn load_guardian(&self, _service_id: &str) -> anyhow::Result<Guardian> {
        let state = self.inner.lock().unwrap();
        Ok(state.guardian.clone().unwrap_or_else(Guardian::fallback))
    }

    async fn submit_pile(&self, _service_id: &str, pile: SessionDataPile) -> anyhow::Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.pile.merge(pile);
        let mut learned = SessionDataCriteria::default();
        learned.learn(&state.pile);
        let guardian = state.guardian.get_or_insert_with(Guardian::fallback);
        match guardian.learned.as_mut() {
            Some(existing) => existing.fuse(&learned),
            None => guardian.learned = Some(learned),
        }
        Ok(())
    }

    async fn submit_alerts(
        &self,
        _service_id: &str,
        mut alerts: Vec<AlertRecord>,
    ) -> anyhow::Result<()> {
        self.inner.lock().unwrap().alerts.append(&mut alerts);
        Ok(())
    }
}
