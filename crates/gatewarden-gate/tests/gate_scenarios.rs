//! End-to-end gate scenarios driving sessions against a local backend.

use std::sync::Arc;
use std::time::Duration;

use gatewarden_core::profile::{Criteria, Pile};
use gatewarden_core::schema::{
    EnvelopProfile, ReqFacts, ReqProfile, RespFacts, RespProfile, SessionDataCriteria,
    SessionDataPile, SessionDataProfile,
};
use gatewarden_core::{DecisionBuilder, GateSettings, Guardian};
use gatewarden_gate::pod::StaticSource;
use gatewarden_gate::{GateError, GateState, GuardianBackend, LocalBackend, Session};

fn gate_state(settings: GateSettings) -> (Arc<GateState>, Arc<LocalBackend>) {
    let backend = Arc::new(LocalBackend::new());
    let state = Arc::new(GateState::new(
        settings,
        backend.clone(),
        Arc::new(StaticSource(Vec::new())),
    ));
    (state, backend)
}

fn req_facts(method: &str, path: &str) -> ReqFacts {
    ReqFacts {
        method: method.to_string(),
        proto: "HTTP/1.1".to_string(),
        path: path.to_string(),
        headers: vec![("accept".to_string(), "application/json".to_string())],
        ..Default::default()
    }
}

fn exchange_profile(method: &str, path: &str, status: u16) -> SessionDataProfile {
    SessionDataProfile {
        req: Some(ReqProfile::from_facts(&req_facts(method, path))),
        resp: Some(RespProfile::from_facts(&RespFacts {
            status,
            ..Default::default()
        })),
        envelop: Some(EnvelopProfile::new(Duration::ZERO, Duration::ZERO)),
        ..Default::default()
    }
}

fn learned_guardian(profiles: &[SessionDataProfile], block: bool) -> Guardian {
    let mut pile = SessionDataPile::default();
    for p in profiles {
        pile.add(p);
    }
    let mut learned = SessionDataCriteria::default();
    learned.learn(&pile);
    let mut guardian = Guardian::fallback();
    guardian.learned = Some(learned);
    guardian.control.block = block;
    guardian
}

#[tokio::test]
async fn test_latched_gate_rejects_before_forwarding() {
    let (state, _) = gate_state(GateSettings::default());
    state.install(learned_guardian(
        &[exchange_profile("GET", "/api/users", 200)],
        true,
    ));
    let mut builder = DecisionBuilder::new();
    builder.reason(2, "peer 198.51.100.99 outside learned ranges");
    state.latch(builder.build().unwrap());

    // Even a request matching the learned boundary must be rejected before
    // the upstream call once the gate itself is latched.
    let session = Session::start(state.clone());
    let err = session
        .approve_request(&req_facts("GET", "/api/users"), b"", false)
        .unwrap_err();
    assert!(matches!(err, GateError::Blocked));
    assert!(*session.cancelled().borrow());
    session.finalize();

    assert_eq!(
        state
            .stats
            .blocked_on_request
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_thousand_concurrent_folds_learn_everything() {
    let (state, _) = gate_state(GateSettings::default());
    state.install(Guardian::fallback());

    let mut handles = Vec::new();
    for task in 0..10u32 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100u32 {
                let profile = exchange_profile(
                    if i % 2 == 0 { "GET" } else { "POST" },
                    &format!("/api/service{task}/item{i}"),
                    if i % 3 == 0 { 200 } else { 201 },
                );
                state.record_profile(&profile, false);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    state.sync().await;
    let view = state.view();
    assert_eq!(view.samples(), 1000);
    for task in 0..10u32 {
        for i in 0..100u32 {
            let profile = exchange_profile(
                if i % 2 == 0 { "GET" } else { "POST" },
                &format!("/api/service{task}/item{i}"),
                if i % 3 == 0 { 200 } else { 201 },
            );
            assert!(
                view.decide(&profile).is_none(),
                "learned profile rejected: task {task} item {i}"
            );
        }
    }
}

#[tokio::test]
async fn test_learning_cycle_then_enforcement() {
    let (state, backend) = gate_state(GateSettings::default());

    // Phase 1: learn from clean traffic under the fallback guardian.
    state.install(Guardian::fallback());
    for i in 0..20 {
        let session = Session::start(state.clone());
        session
            .approve_request(&req_facts("GET", &format!("/api/users/u{i}")), b"", false)
            .unwrap();
        session
            .approve_response(
                &RespFacts {
                    status: 200,
                    ..Default::default()
                },
                br#"{"name": "alice", "age": 30}"#,
                true,
            )
            .unwrap();
        session.finalize();
    }
    state.sync().await;
    assert_eq!(state.view().samples(), 20);

    // Phase 2: turn blocking on over what was learned.
    let mut guardian = backend.load_guardian("default").await.unwrap();
    guardian.control.block = true;
    guardian.control.learn = false;
    backend.seed(guardian);
    state.sync().await;

    // Conforming traffic still flows.
    let session = Session::start(state.clone());
    session
        .approve_request(&req_facts("GET", "/api/users/u3"), b"", false)
        .unwrap();
    session
        .approve_response(
            &RespFacts {
                status: 200,
                ..Default::default()
            },
            br#"{"name": "bob", "age": 41}"#,
            true,
        )
        .unwrap();
    session.finalize();

    // An injection-shaped request is rejected and alerted.
    let session = Session::start(state.clone());
    let err = session
        .approve_request(
            &req_facts("GET", "/api/users/u3%27%20OR%201=1--"),
            b"",
            false,
        )
        .unwrap_err();
    assert!(matches!(err, GateError::Blocked));
    session.finalize();

    state.sync().await;
    assert!(!backend.alerts().is_empty());
}

#[tokio::test]
async fn test_response_anomaly_blocked_after_forward() {
    let (state, _) = gate_state(GateSettings::default());
    state.install(learned_guardian(
        &[exchange_profile("GET", "/api/users", 200)],
        true,
    ));

    let session = Session::start(state.clone());
    session
        .approve_request(&req_facts("GET", "/api/users"), b"", false)
        .unwrap();
    let err = session
        .approve_response(
            &RespFacts {
                status: 500,
                ..Default::default()
            },
            b"",
            false,
        )
        .unwrap_err();
    assert!(matches!(err, GateError::Blocked));
    session.finalize();

    assert_eq!(
        state
            .stats
            .blocked_on_response
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}
