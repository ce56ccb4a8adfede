//! Shared gate state and the sync cadence.
//!
//! One [`GateState`] is shared by every in-flight session, the pod monitor
//! and the main loop. Sessions read an immutable [`GuardianView`] snapshot
//! and fold their results into the outgoing pile and alert batch; the main
//! loop decides when those are worth a round-trip to the backend.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gatewarden_core::profile::{Criteria, Pile};
use gatewarden_core::schema::{PodProfile, SessionDataCriteria, SessionDataPile, SessionDataProfile};
use gatewarden_core::{Control, Decision, GateSettings, Guardian};

use crate::pod::PeerSource;
use crate::sync::{AlertRecord, GuardianBackend};

/// Immutable snapshot of the boundary and knobs a session screens against.
///
/// Swapped wholesale on every successful sync, so a session observes one
/// consistent view for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct GuardianView {
    pub control: Control,
    pub criteria: Option<SessionDataCriteria>,
}

impl GuardianView {
    /// Screen a profile. No criteria yet means nothing to enforce.
    pub fn decide(&self, profile: &SessionDataProfile) -> Option<Decision> {
        self.criteria.as_ref().and_then(|c| c.decide(profile))
    }

    pub fn samples(&self) -> u64 {
        self.criteria.as_ref().map_or(0, |c| c.samples())
    }
}

/// How one session ended, for outcome accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Completed with nothing to report.
    NoAlert,
    /// Completed, but raised at least one alert.
    SessionAlert,
    /// Rejected before the upstream call.
    BlockedOnRequest,
    /// Rejected after the upstream answered, or cancelled mid-flight.
    BlockedOnResponse,
    /// Upstream never answered.
    NoResponse,
}

/// Monotonic counters, reported on every main-loop tick.
#[derive(Debug, Default)]
pub struct GateStats {
    pub total: AtomicU64,
    pub no_alert: AtomicU64,
    pub session_alert: AtomicU64,
    pub blocked_on_request: AtomicU64,
    pub blocked_on_response: AtomicU64,
    pub no_response: AtomicU64,
    pub syncs: AtomicU64,
    pub sync_failures: AtomicU64,
}

impl GateStats {
    pub fn record(&self, outcome: SessionOutcome) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            SessionOutcome::NoAlert => &self.no_alert,
            SessionOutcome::SessionAlert => &self.session_alert,
            SessionOutcome::BlockedOnRequest => &self.blocked_on_request,
            SessionOutcome::BlockedOnResponse => &self.blocked_on_response,
            SessionOutcome::NoResponse => &self.no_response,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn log(&self) {
        debug!(
            total = self.total.load(Ordering::Relaxed),
            no_alert = self.no_alert.load(Ordering::Relaxed),
            session_alert = self.session_alert.load(Ordering::Relaxed),
            blocked_on_request = self.blocked_on_request.load(Ordering::Relaxed),
            blocked_on_response = self.blocked_on_response.load(Ordering::Relaxed),
            no_response = self.no_response.load(Ordering::Relaxed),
            syncs = self.syncs.load(Ordering::Relaxed),
            sync_failures = self.sync_failures.load(Ordering::Relaxed),
            "gate stats"
        );
    }
}

pub struct GateState {
    pub settings: GateSettings,
    pub stats: GateStats,
    backend: Arc<dyn GuardianBackend>,
    peers: Arc<dyn PeerSource>,
    view: RwLock<Arc<GuardianView>>,
    pile: Mutex<SessionDataPile>,
    alerts: Mutex<Vec<AlertRecord>>,
    /// Pod-level compromise report. Set once, never cleared.
    gate_decision: Mutex<Option<Decision>>,
    /// Latest pod snapshot, folded into session profiles.
    pod_profile: Mutex<Option<PodProfile>>,
    /// Criteria learned from piles this gate already shipped, fused into the
    /// view so freshly learned traffic keeps passing between backend rounds.
    local_learned: Mutex<Option<SessionDataCriteria>>,
    skipped_ticks: AtomicU32,
    last_sync: Mutex<Option<Instant>>,
    /// Raised once when a latched compromise coincides with blocking, so the
    /// host can self-terminate.
    compromise_tx: watch::Sender<bool>,
}

impl GateState {
    pub fn new(
        settings: GateSettings,
        backend: Arc<dyn GuardianBackend>,
        peers: Arc<dyn PeerSource>,
    ) -> Self {
        GateState {
            settings,
            stats: GateStats::default(),
            backend,
            peers,
            view: RwLock::new(Arc::new(GuardianView::default())),
            pile: Mutex::new(SessionDataPile::default()),
            alerts: Mutex::new(Vec::new()),
            gate_decision: Mutex::new(None),
            pod_profile: Mutex::new(None),
            local_learned: Mutex::new(None),
            skipped_ticks: AtomicU32::new(0),
            last_sync: Mutex::new(None),
            compromise_tx: watch::channel(false).0,
        }
    }

    /// Receiver that flips to `true` when the gate latches compromised while
    /// blocking is in force.
    pub fn compromise_signal(&self) -> watch::Receiver<bool> {
        self.compromise_tx.subscribe()
    }

    /// The view current sessions should screen against.
    pub fn view(&self) -> Arc<GuardianView> {
        self.view.read().unwrap().clone()
    }

    /// Latest pod snapshot, for inclusion in session profiles.
    pub fn pod_profile(&self) -> Option<PodProfile> {
        self.pod_profile.lock().unwrap().clone()
    }

    /// True once the gate itself is latched compromised and blocking is on.
    pub fn gate_blocked(&self) -> bool {
        self.view().control.block && self.gate_decision.lock().unwrap().is_some()
    }

    /// Latch a gate-level compromise report. Latching is one-way; later
    /// reports are absorbed into the first.
    pub fn latch(&self, decision: Decision) {
        let mut latched = self.gate_decision.lock().unwrap();
        match latched.as_mut() {
            Some(existing) => existing.absorb(decision),
            None => {
                warn!(summary = %decision.summary(), "gate latched compromised");
                *latched = Some(decision);
            }
        }
        if self.view().control.block {
            // send_replace stores the value even with no subscribers, so a
            // latch during startup is still visible to a later receiver.
            self.compromise_tx.send_replace(true);
        }
    }

    /// Fold a completed session profile into the outgoing pile, honoring the
    /// learn/force knobs.
    pub fn record_profile(&self, profile: &SessionDataProfile, alerted: bool) {
        let control = self.view().control;
        if !control.learn || (alerted && !control.force) {
            return;
        }
        self.pile.lock().unwrap().add(profile);
    }

    /// Queue a session's alert for the next sync.
    pub fn record_alert(&self, decision: Decision) {
        if !self.view().control.alert {
            return;
        }
        self.alerts
            .lock()
            .unwrap()
            .push(AlertRecord::new(&self.settings.service_id, decision));
    }

    /// Snapshot the pod's current peers and screen them.
    ///
    /// Any violation is both alerted and latched; the pod set itself is kept
    /// so in-flight sessions profile against a current snapshot.
    pub fn pod_monitor_sweep(&self) {
        let addrs = match self.peers.peers() {
            Ok(addrs) => addrs,
            Err(err) => {
                warn!(error = %err, "pod peer snapshot failed");
                return;
            }
        };
        let profile = PodProfile::from_peers(addrs);
        let view = self.view();
        if let Some(criteria) = &view.criteria {
            if let Some(decision) = criteria.decide_pod(&profile) {
                self.record_alert(decision.clone());
                self.latch(decision);
            }
        }
        *self.pod_profile.lock().unwrap() = Some(profile);
    }

    /// One main-loop tick: log stats and sync when the cadence says so.
    pub async fn tick(&self) {
        self.stats.log();
        let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sync_due(skipped) {
            self.sync().await;
        }
    }

    /// Externally requested sync. Rate-limited by the minimum inter-sync
    /// interval, unlike the cadence-driven path; returns whether it ran.
    pub async fn force_sync(&self) -> bool {
        let too_soon = self
            .last_sync
            .lock()
            .unwrap()
            .is_some_and(|last| last.elapsed() < self.settings.min_sync_interval());
        if too_soon {
            debug!("forced sync suppressed, minimum interval not elapsed");
            return false;
        }
        self.sync().await;
        true
    }

    /// Sync cadence: pending alerts near the batch cap, a pile large relative
    /// to the learned population (with an absolute floor), or too many ticks
    /// without a round-trip.
    fn sync_due(&self, skipped: u32) -> bool {
        if skipped >= self.settings.max_skipped_ticks {
            return true;
        }
        if self.alerts.lock().unwrap().len() >= self.settings.alert_batch_cap {
            return true;
        }
        let piled = self.pile.lock().unwrap().count();
        if piled == 0 {
            return false;
        }
        if piled >= self.settings.pile_sync_floor {
            return true;
        }
        let samples = self.view().samples();
        samples > 0 && piled as f64 >= self.settings.pile_sync_fraction * samples as f64
    }

    /// One learning round-trip.
    ///
    /// The pile and alert batch are taken out up front; on transport failure
    /// they are pushed back for the next attempt and the previous view stays
    /// in force.
    pub async fn sync(&self) {
        self.skipped_ticks.store(0, Ordering::Relaxed);
        *self.last_sync.lock().unwrap() = Some(Instant::now());

        let pile = std::mem::take(&mut *self.pile.lock().unwrap());
        let alerts = std::mem::take(&mut *self.alerts.lock().unwrap());

        if pile.count() > 0 {
            // Learn locally before shipping so this gate's own traffic keeps
            // passing even if the backend round-trip is slow or lost. The
            // guard must not be held across the await below.
            let mut candidate = SessionDataCriteria::default();
            candidate.learn(&pile);
            {
                let mut local = self.local_learned.lock().unwrap();
                match local.as_mut() {
                    Some(existing) => existing.fuse(&candidate),
                    None => *local = Some(candidate),
                }
            }
            if let Err(err) = self
                .backend
                .submit_pile(&self.settings.service_id, pile.clone())
                .await
            {
                error!(error = %err, "pile submission failed, retaining pile");
                self.stats.sync_failures.fetch_add(1, Ordering::Relaxed);
                self.pile.lock().unwrap().merge(pile);
            }
        }

        if !alerts.is_empty() {
            if let Err(err) = self
                .backend
                .submit_alerts(&self.settings.service_id, alerts.clone())
                .await
            {
                error!(error = %err, "alert submission failed, retaining alerts");
                self.stats.sync_failures.fetch_add(1, Ordering::Relaxed);
                self.alerts.lock().unwrap().extend(alerts);
            }
        }

        match self.backend.load_guardian(&self.settings.service_id).await {
            Ok(guardian) => {
                self.stats.syncs.fetch_add(1, Ordering::Relaxed);
                self.install(guardian);
            }
            Err(err) => {
                error!(error = %err, "guardian load failed, keeping previous view");
                self.stats.sync_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Replace the current view from a freshly loaded Guardian, fusing in
    /// locally learned criteria when the Learned boundary is active.
    pub fn install(&self, guardian: Guardian) {
        let mut criteria = guardian.active().cloned();
        if guardian.control.auto {
            if let Some(local) = self.local_learned.lock().unwrap().as_ref() {
                match criteria.as_mut() {
                    Some(c) => c.fuse(local),
                    None => criteria = Some(local.clone()),
                }
            }
        }
        let view = GuardianView {
            control: guardian.control,
            criteria,
        };
        info!(
            auto = view.control.auto,
            block = view.control.block,
            samples = view.samples(),
            "guardian view installed"
        );
        *self.view.write().unwrap() = Arc::new(view);
    }
}
