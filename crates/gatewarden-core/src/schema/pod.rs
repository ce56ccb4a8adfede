//! Pod network-peer schema node.
//!
//! A snapshot of the addresses the pod currently talks to. A compromised
//! workload opening connections to unlearned destinations shows up here even
//! when its HTTP traffic stays clean.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::profile::{Criteria, IpSetCriteria, IpSetPile, IpSetProfile, Pile};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodProfile {
    peers: IpSetProfile,
}

impl PodProfile {
    pub fn from_peers<I: IntoIterator<Item = IpAddr>>(peers: I) -> Self {
        PodProfile {
            peers: IpSetProfile::from_addrs(peers),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodPile {
    peers: IpSetPile,
}

impl Pile for PodPile {
    type Profile = PodProfile;

    fn add(&mut self, profile: &PodProfile) {
        self.peers.add(&profile.peers);
    }

    fn merge(&mut self, other: Self) {
        self.peers.merge(other.peers);
    }

    fn clear(&mut self) {
        self.peers.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCriteria {
    peers: IpSetCriteria,
}

impl Criteria for PodCriteria {
    type Profile = PodProfile;
    type Pile = PodPile;

    fn learn(&mut self, pile: &PodPile) {
        self.peers.learn(&pile.peers);
    }

    fn fuse(&mut self, other: &Self) {
        self.peers.fuse(&other.peers);
    }

    fn decide(&self, profile: &PodProfile) -> Option<Decision> {
        self.peers.decide(&profile.peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_unlearned_peer_reported() {
        let mut pile = PodPile::default();
        pile.add(&PodProfile::from_peers([ip("203.0.113.10")]));
        let mut criteria = PodCriteria::default();
        criteria.learn(&pile);

        assert!(criteria
            .decide(&PodProfile::from_peers([ip("203.0.113.10")]))
            .is_none());
        assert!(criteria
            .decide(&PodProfile::from_peers([ip("198.51.100.99")]))
            .is_some());
    }

    #[test]
    fn test_cluster_local_peers_ignored() {
        let mut criteria = PodCriteria::default();
        criteria.learn(&PodPile::default());
        assert!(criteria
            .decide(&PodProfile::from_peers([ip("10.42.0.7"), ip("127.0.0.1")]))
            .is_none());
    }
}
