//! Root of the exchange schema tree.
//!
//! One `SessionDataProfile` is built incrementally per request: the request
//! half at arrival, the response half when the upstream answers, timing and
//! pod snapshots along the way. The root pile counts how many profiles were
//! folded in; the learned criteria carry that count forward so the gate can
//! scale its sync cadence to the learned population size.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};
use crate::schema::body::{BodyCriteria, BodyPile, BodyProfile};
use crate::schema::envelop::{EnvelopCriteria, EnvelopPile, EnvelopProfile};
use crate::schema::pod::{PodCriteria, PodPile, PodProfile};
use crate::schema::req::{ReqCriteria, ReqPile, ReqProfile};
use crate::schema::resp::{RespCriteria, RespPile, RespProfile};

/// Incrementally built fingerprint of one HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDataProfile {
    pub req: Option<ReqProfile>,
    pub req_body: Option<BodyProfile>,
    pub resp: Option<RespProfile>,
    pub resp_body: Option<BodyProfile>,
    pub envelop: Option<EnvelopProfile>,
    pub pod: Option<PodProfile>,
}

/// Accumulator for a population of exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDataPile {
    req: ReqPile,
    req_body: BodyPile,
    resp: RespPile,
    resp_body: BodyPile,
    envelop: EnvelopPile,
    pod: PodPile,
    /// Number of profiles folded in.
    count: u64,
}

impl SessionDataPile {
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Pile for SessionDataPile {
    type Profile = SessionDataProfile;

    fn add(&mut self, profile: &SessionDataProfile) {
        if let Some(req) = &profile.req {
            self.req.add(req);
        }
        if let Some(req_body) = &profile.req_body {
            self.req_body.add(req_body);
        }
        if let Some(resp) = &profile.resp {
            self.resp.add(resp);
        }
        if let Some(resp_body) = &profile.resp_body {
            self.resp_body.add(resp_body);
        }
        if let Some(envelop) = &profile.envelop {
            self.envelop.add(envelop);
        }
        if let Some(pod) = &profile.pod {
            self.pod.add(pod);
        }
        self.count += 1;
    }

    fn merge(&mut self, other: Self) {
        self.req.merge(other.req);
        self.req_body.merge(other.req_body);
        self.resp.merge(other.resp);
        self.resp_body.merge(other.resp_body);
        self.envelop.merge(other.envelop);
        self.pod.merge(other.pod);
        self.count += other.count;
    }

    fn clear(&mut self) {
        self.req.clear();
        self.req_body.clear();
        self.resp.clear();
        self.resp_body.clear();
        self.envelop.clear();
        self.pod.clear();
        self.count = 0;
    }
}

/// Boundary for the whole exchange tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDataCriteria {
    req: ReqCriteria,
    req_body: BodyCriteria,
    resp: RespCriteria,
    resp_body: BodyCriteria,
    envelop: EnvelopCriteria,
    pod: PodCriteria,
    /// Size of the population this was learned from.
    samples: u64,
}

impl SessionDataCriteria {
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Screen only the pod node; used by the gate-level pod monitor.
    pub fn decide_pod(&self, profile: &PodProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        builder.child("pod", self.pod.decide(profile));
        builder.build()
    }
}

impl Criteria for SessionDataCriteria {
    type Profile = SessionDataProfile;
    type Pile = SessionDataPile;

    fn learn(&mut self, pile: &SessionDataPile) {
        self.req.learn(&pile.req);
        self.req_body.learn(&pile.req_body);
        self.resp.learn(&pile.resp);
        self.resp_body.learn(&pile.resp_body);
        self.envelop.learn(&pile.envelop);
        self.pod.learn(&pile.pod);
        self.samples = pile.count;
    }

    fn fuse(&mut self, other: &Self) {
        self.req.fuse(&other.req);
        self.req_body.fuse(&other.req_body);
        self.resp.fuse(&other.resp);
        self.resp_body.fuse(&other.resp_body);
        self.envelop.fuse(&other.envelop);
        self.pod.fuse(&other.pod);
        self.samples = self.samples.max(other.samples);
    }

    fn decide(&self, profile: &SessionDataProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        if let Some(req) = &profile.req {
            builder.child("req", self.req.decide(req));
        }
        if let Some(req_body) = &profile.req_body {
            builder.child("reqbody", self.req_body.decide(req_body));
        }
        if let Some(resp) = &profile.resp {
            builder.child("resp", self.resp.decide(resp));
        }
        if let Some(resp_body) = &profile.resp_body {
            builder.child("respbody", self.resp_body.decide(resp_body));
        }
        if let Some(envelop) = &profile.envelop {
            builder.child("envelop", self.envelop.decide(envelop));
        }
        if let Some(pod) = &profile.pod {
            builder.child("pod", self.pod.decide(pod));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::req::ReqFacts;
    use crate::schema::resp::RespFacts;
    use std::time::Duration;

    fn exchange(method: &str, path: &str, status: u16) -> SessionDataProfile {
        SessionDataProfile {
            req: Some(ReqProfile::from_facts(&ReqFacts {
                method: method.to_string(),
                proto: "HTTP/1.1".to_string(),
                path: path.to_string(),
                ..Default::default()
            })),
            resp: Some(RespProfile::from_facts(&RespFacts {
                status,
                ..Default::default()
            })),
            envelop: Some(EnvelopProfile::new(
                Duration::from_millis(80),
                Duration::from_millis(90),
            )),
            ..Default::default()
        }
    }

    #[test]
    fn test_learned_exchanges_pass() {
        let mut pile = SessionDataPile::default();
        pile.add(&exchange("GET", "/api/users", 200));
        pile.add(&exchange("GET", "/api/items", 200));
        assert_eq!(pile.count(), 2);

        let mut criteria = SessionDataCriteria::default();
        criteria.learn(&pile);
        assert_eq!(criteria.samples(), 2);

        assert!(criteria.decide(&exchange("GET", "/api/users", 200)).is_none());
    }

    #[test]
    fn test_violations_attached_under_child_names() {
        let mut pile = SessionDataPile::default();
        pile.add(&exchange("GET", "/api/users", 200));
        let mut criteria = SessionDataCriteria::default();
        criteria.learn(&pile);

        let decision = criteria
            .decide(&exchange("TRACE", "/api/users", 500))
            .expect("method and status both unlearned");
        assert!(decision.children.contains_key("req"));
        assert!(decision.children.contains_key("resp"));
    }

    #[test]
    fn test_partial_profile_screens_present_parts_only() {
        let mut pile = SessionDataPile::default();
        pile.add(&exchange("GET", "/api/users", 200));
        let mut criteria = SessionDataCriteria::default();
        criteria.learn(&pile);

        // Request-only profile, as screened before forwarding.
        let mut partial = exchange("GET", "/api/users", 200);
        partial.resp = None;
        partial.envelop = None;
        assert!(criteria.decide(&partial).is_none());
    }

    #[test]
    fn test_pile_serde_round_trip_preserves_learn() {
        let mut pile = SessionDataPile::default();
        pile.add(&exchange("GET", "/api/users", 200));
        pile.add(&exchange("POST", "/api/items", 201));

        let json = serde_json::to_string(&pile).unwrap();
        let back: SessionDataPile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.count(), 2);

        let mut original = SessionDataCriteria::default();
        original.learn(&pile);
        let mut restored = SessionDataCriteria::default();
        restored.learn(&back);
        assert_eq!(restored, original);
        assert!(restored.decide(&exchange("GET", "/api/users", 200)).is_none());
        assert!(restored.decide(&exchange("TRACE", "/x/y", 500)).is_some());
    }

    #[test]
    fn test_concurrent_fold_order_does_not_matter() {
        let profiles: Vec<SessionDataProfile> = (0..100)
            .map(|i| exchange("GET", if i % 2 == 0 { "/a" } else { "/b" }, 200))
            .collect();

        let mut forward = SessionDataPile::default();
        for p in &profiles {
            forward.add(p);
        }
        let mut reversed = SessionDataPile::default();
        for p in profiles.iter().rev() {
            reversed.add(p);
        }

        let mut a = SessionDataCriteria::default();
        a.learn(&forward);
        let mut b = SessionDataCriteria::default();
        b.learn(&reversed);
        for p in &profiles {
            assert!(a.decide(p).is_none());
            assert!(b.decide(p).is_none());
        }
    }
}
