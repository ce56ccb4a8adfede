//! Client request schema node.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{
    CountCriteria, CountPile, CountProfile, Criteria, IpSetCriteria, IpSetPile, IpSetProfile,
    KeyValCriteria, KeyValPile, KeyValProfile, LimitCriteria, LimitPile, LimitProfile, Pile,
    SetCriteria, SetPile, SetProfile, SimpleValCriteria, SimpleValPile, SimpleValProfile,
    SimpleValScanner,
};

/// Raw request data handed to the profiler by the gate.
#[derive(Debug, Clone, Default)]
pub struct ReqFacts {
    pub method: String,
    pub proto: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub client_addr: Option<IpAddr>,
}

/// Fingerprint of one request line, URL, query, headers and client address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqProfile {
    method: SetProfile,
    proto: SetProfile,
    /// All path segments folded into one fingerprint.
    url: SimpleValProfile,
    /// Number of path segments.
    segments: CountProfile,
    qs: KeyValProfile,
    headers: KeyValProfile,
    content_length: LimitProfile,
    client_addr: IpSetProfile,
}

impl ReqProfile {
    pub fn from_facts(facts: &ReqFacts) -> Self {
        let mut scanner = SimpleValScanner::default();
        let mut segments = 0usize;
        for segment in facts.path.split('/').filter(|s| !s.is_empty()) {
            scanner.scan(segment);
            segments += 1;
        }
        ReqProfile {
            method: SetProfile::single(&facts.method),
            proto: SetProfile::single(&facts.proto),
            url: scanner.finish(),
            segments: CountProfile::from(segments),
            qs: KeyValProfile::from_pairs(
                facts.query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            headers: KeyValProfile::from_pairs(
                facts.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            content_length: LimitProfile::from(facts.content_length),
            client_addr: IpSetProfile::from_addrs(facts.client_addr),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReqPile {
    method: SetPile,
    proto: SetPile,
    url: SimpleValPile,
    segments: CountPile,
    qs: KeyValPile,
    headers: KeyValPile,
    content_length: LimitPile,
    client_addr: IpSetPile,
}

impl Pile for ReqPile {
    type Profile = ReqProfile;

    fn add(&mut self, profile: &ReqProfile) {
        self.method.add(&profile.method);
        self.proto.add(&profile.proto);
        self.url.add(&profile.url);
        self.segments.add(&profile.segments);
        self.qs.add(&profile.qs);
        self.headers.add(&profile.headers);
        self.content_length.add(&profile.content_length);
        self.client_addr.add(&profile.client_addr);
    }

    fn merge(&mut self, other: Self) {
        self.method.merge(other.method);
        self.proto.merge(other.proto);
        self.url.merge(other.url);
        self.segments.merge(other.segments);
        self.qs.merge(other.qs);
        self.headers.merge(other.headers);
        self.content_length.merge(other.content_length);
        self.client_addr.merge(other.client_addr);
    }

    fn clear(&mut self) {
        self.method.clear();
        self.proto.clear();
        self.url.clear();
        self.segments.clear();
        self.qs.clear();
        self.headers.clear();
        self.content_length.clear();
        self.client_addr.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReqCriteria {
    method: SetCriteria,
    proto: SetCriteria,
    url: SimpleValCriteria,
    segments: CountCriteria,
    qs: KeyValCriteria,
    headers: KeyValCriteria,
    content_length: LimitCriteria,
    client_addr: IpSetCriteria,
}

impl Criteria for ReqCriteria {
    type Profile = ReqProfile;
    type Pile = ReqPile;

    fn learn(&mut self, pile: &ReqPile) {
        self.method.learn(&pile.method);
        self.proto.learn(&pile.proto);
        self.url.learn(&pile.url);
        self.segments.learn(&pile.segments);
        self.qs.learn(&pile.qs);
        self.headers.learn(&pile.headers);
        self.content_length.learn(&pile.content_length);
        self.client_addr.learn(&pile.client_addr);
    }

    fn fuse(&mut self, other: &Self) {
        self.method.fuse(&other.method);
        self.proto.fuse(&other.proto);
        self.url.fuse(&other.url);
        self.segments.fuse(&other.segments);
        self.qs.fuse(&other.qs);
        self.headers.fuse(&other.headers);
        self.content_length.fuse(&other.content_length);
        self.client_addr.fuse(&other.client_addr);
    }

    fn decide(&self, profile: &ReqProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        builder.child("method", self.method.decide(&profile.method));
        builder.child("proto", self.proto.decide(&profile.proto));
        builder.child("url", self.url.decide(&profile.url));
        builder.child("segments", self.segments.decide(&profile.segments));
        builder.child("qs", self.qs.decide(&profile.qs));
        builder.child("headers", self.headers.decide(&profile.headers));
        builder.child(
            "content-length",
            self.content_length.decide(&profile.content_length),
        );
        builder.child("client-addr", self.client_addr.decide(&profile.client_addr));
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(method: &str, path: &str, query: &[(&str, &str)]) -> ReqFacts {
        ReqFacts {
            method: method.to_string(),
            proto: "HTTP/1.1".to_string(),
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: vec![("accept".to_string(), "application/json".to_string())],
            content_length: 0,
            client_addr: None,
        }
    }

    fn learned(observations: &[ReqFacts]) -> ReqCriteria {
        let mut pile = ReqPile::default();
        for f in observations {
            pile.add(&ReqProfile::from_facts(f));
        }
        let mut criteria = ReqCriteria::default();
        criteria.learn(&pile);
        criteria
    }

    #[test]
    fn test_learned_requests_pass() {
        let observations = vec![
            facts("GET", "/api/users/alice", &[("page", "1")]),
            facts("GET", "/api/users/bob", &[("page", "2")]),
        ];
        let criteria = learned(&observations);
        for f in &observations {
            assert!(criteria.decide(&ReqProfile::from_facts(f)).is_none());
        }
    }

    #[test]
    fn test_unlearned_method_reported_under_child() {
        let criteria = learned(&[facts("GET", "/api/users", &[])]);
        let decision = criteria
            .decide(&ReqProfile::from_facts(&facts("DELETE", "/api/users", &[])))
            .expect("DELETE was never learned");
        assert!(decision.children.contains_key("method"));
    }

    #[test]
    fn test_extra_path_segments_reported() {
        let criteria = learned(&[facts("GET", "/api/users", &[])]);
        let deep = facts("GET", "/api/users/1/activate/now/really", &[]);
        let decision = criteria
            .decide(&ReqProfile::from_facts(&deep))
            .expect("segment count was never learned");
        assert!(decision.children.contains_key("segments"));
    }

    #[test]
    fn test_traversal_shaped_url_fails() {
        let criteria = learned(&[
            facts("GET", "/api/users/alice", &[]),
            facts("GET", "/api/users/bob", &[]),
        ]);
        let attack = facts("GET", "/api/users/..%2f..%2fetc%2fpasswd", &[]);
        assert!(criteria.decide(&ReqProfile::from_facts(&attack)).is_some());
    }
}
