//! Per-request session lifecycle.
//!
//! One [`Session`] is created per inbound request and walks a fixed path:
//! request screening, optional in-flight ticking for long exchanges,
//! response screening, finalization. Screening accumulates at most one
//! Decision tree per session; blocking consults both that alert and the
//! gate-level latch, and rejecting is always fail-closed through the fixed
//! [`GateError::Blocked`] error.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gatewarden_core::schema::{
    BodyProfile, EnvelopProfile, ReqFacts, ReqProfile, RespFacts, RespProfile, SessionDataProfile,
};
use gatewarden_core::{Decision, DecisionBuilder};

use crate::error::{GateError, Result};
use crate::state::{GateState, GuardianView, SessionOutcome};

struct Inner {
    profile: SessionDataProfile,
    alert: Option<Decision>,
    outcome: Option<SessionOutcome>,
    response_seen: bool,
    finalized: bool,
}

pub struct Session {
    state: Arc<GateState>,
    /// View snapshot taken at creation; one session never sees two views.
    view: Arc<GuardianView>,
    started: Instant,
    inner: Mutex<Inner>,
    cancel_tx: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session and start its in-flight ticker.
    pub fn start(state: Arc<GateState>) -> Arc<Self> {
        let session = Arc::new(Session {
            view: state.view(),
            started: Instant::now(),
            inner: Mutex::new(Inner {
                profile: SessionDataProfile::default(),
                alert: None,
                outcome: None,
                response_seen: false,
                finalized: false,
            }),
            cancel_tx: watch::channel(false).0,
            ticker: Mutex::new(None),
            state,
        });
        let handle = tokio::spawn(Self::run_ticker(Arc::downgrade(&session)));
        *session.ticker.lock().unwrap() = Some(handle);
        session
    }

    /// Receiver that flips to `true` when the session is cancelled, for
    /// select-style racing against the upstream call.
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Stop the exchange. Idempotent; callable from both the block check and
    /// the outer handler. `send_replace` updates the value even when no
    /// receiver is subscribed yet, so an early cancel is never lost.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Screen the request half. `Err(Blocked)` means do not forward.
    pub fn approve_request(&self, facts: &ReqFacts, body: &[u8], body_is_json: bool) -> Result<()> {
        let phase = SessionDataProfile {
            req: Some(ReqProfile::from_facts(facts)),
            req_body: self.profile_body(body, body_is_json, "request body"),
            envelop: Some(self.elapsed_envelop()),
            pod: self.state.pod_profile(),
            ..Default::default()
        };
        {
            let mut inner = self.inner.lock().unwrap();
            inner.profile.req = phase.req.clone();
            inner.profile.req_body = phase.req_body.clone();
            inner.profile.envelop = phase.envelop.clone();
            inner.profile.pod = phase.pod.clone();
        }
        self.screen(&phase);
        if self.should_block() {
            self.set_outcome(SessionOutcome::BlockedOnRequest);
            self.cancel();
            return Err(GateError::Blocked);
        }
        Ok(())
    }

    /// Screen the response half. `Err(Blocked)` means do not relay.
    pub fn approve_response(
        &self,
        facts: &RespFacts,
        body: &[u8],
        body_is_json: bool,
    ) -> Result<()> {
        let phase = SessionDataProfile {
            resp: Some(RespProfile::from_facts(facts)),
            resp_body: self.profile_body(body, body_is_json, "response body"),
            envelop: Some(self.elapsed_envelop()),
            ..Default::default()
        };
        {
            let mut inner = self.inner.lock().unwrap();
            inner.response_seen = true;
            inner.profile.resp = phase.resp.clone();
            inner.profile.resp_body = phase.resp_body.clone();
            inner.profile.envelop = phase.envelop.clone();
        }
        self.screen(&phase);
        if self.should_block() {
            self.set_outcome(SessionOutcome::BlockedOnResponse);
            self.cancel();
            return Err(GateError::Blocked);
        }
        Ok(())
    }

    /// Close out the session: stop the ticker, account the outcome, and fold
    /// the profile into the gate's pile when learning allows. Idempotent.
    pub fn finalize(&self) {
        self.cancel();
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
        let (profile, alert, outcome) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.finalized {
                return;
            }
            inner.finalized = true;
            inner.profile.envelop = Some(self.elapsed_envelop());
            let outcome = inner.outcome.unwrap_or(match (inner.response_seen, &inner.alert) {
                (false, _) => SessionOutcome::NoResponse,
                (true, Some(_)) => SessionOutcome::SessionAlert,
                (true, None) => SessionOutcome::NoAlert,
            });
            (inner.profile.clone(), inner.alert.clone(), outcome)
        };
        self.state.stats.record(outcome);
        if let Some(alert) = &alert {
            debug!(summary = %alert.summary(), ?outcome, "session alerted");
            self.state.record_alert(alert.clone());
        }
        self.state.record_profile(&profile, alert.is_some());
    }

    fn elapsed_envelop(&self) -> EnvelopProfile {
        let elapsed = self.started.elapsed();
        EnvelopProfile::new(elapsed, elapsed)
    }

    /// Profile a body, converting a malformed-input fault into an alert so a
    /// profiling failure can never let an unscreened payload through.
    fn profile_body(&self, body: &[u8], is_json: bool, what: &str) -> Option<BodyProfile> {
        match BodyProfile::from_bytes(body, is_json) {
            Ok(profile) if profile.is_empty() => None,
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(error = %err, what, "body profiling failed");
                let mut builder = DecisionBuilder::new();
                builder.reason(4, format!("unprofileable {what}"));
                if let Some(decision) = builder.build() {
                    self.absorb_alert(decision);
                }
                None
            }
        }
    }

    /// Screen one phase's slice of the profile, folding any report into the
    /// session alert. Only the nodes present in `phase` are judged, so a
    /// violation already reported by an earlier phase is not re-reported.
    fn screen(&self, phase: &SessionDataProfile) {
        if let Some(decision) = self.view.decide(phase) {
            self.absorb_alert(decision);
        }
    }

    fn absorb_alert(&self, decision: Decision) {
        let mut inner = self.inner.lock().unwrap();
        match inner.alert.as_mut() {
            Some(existing) => existing.absorb(decision),
            None => inner.alert = Some(decision),
        }
    }

    fn has_alert(&self) -> bool {
        self.inner.lock().unwrap().alert.is_some()
    }

    fn should_block(&self) -> bool {
        self.view.control.block && (self.has_alert() || self.state.gate_blocked())
    }

    fn set_outcome(&self, outcome: SessionOutcome) {
        let mut inner = self.inner.lock().unwrap();
        if inner.outcome.is_none() {
            inner.outcome = Some(outcome);
        }
    }

    /// Periodic in-flight re-screen of timing and pod state.
    ///
    /// Holds only a weak reference so a dropped session ends the task even if
    /// abort races the final tick.
    async fn run_ticker(session: std::sync::Weak<Session>) {
        let interval = match session.upgrade() {
            Some(s) => s.state.settings.session_tick(),
            None => return,
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(session) = session.upgrade() else {
                return;
            };
            if *session.cancel_tx.borrow() {
                return;
            }
            session.tick();
        }
    }

    fn tick(&self) {
        let phase = SessionDataProfile {
            envelop: Some(self.elapsed_envelop()),
            pod: self.state.pod_profile(),
            ..Default::default()
        };
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.finalized {
                return;
            }
            inner.profile.envelop = phase.envelop.clone();
            inner.profile.pod = phase.pod.clone();
        }
        self.screen(&phase);
        if self.should_block() {
            self.set_outcome(SessionOutcome::BlockedOnResponse);
            self.cancel();
        }
    }
}
