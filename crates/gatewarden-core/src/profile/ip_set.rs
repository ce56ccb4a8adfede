//! Address-range generalization over learned CIDR prefixes.
//!
//! Profiles keep only public addresses: unspecified, loopback, link-local and
//! private ranges are discarded at profiling time and always pass at decide
//! time, mirroring the filter on both sides. Learning widens ("inflates") an
//! existing prefix to cover a new address only while the result stays at
//! least a /24 (v4) or /120 (v6), bounding the over-authorization radius;
//! otherwise a host-exact prefix is appended.
//!
//! Fuse never coalesces overlapping or adjacent prefixes after the fact, so
//! `fuse(x, x)` is only best-effort idempotent for this kind. The
//! conservative bias is what keeps the radius bound honest.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};

/// Widest prefix inflation may produce for IPv4.
const V4_PREFIX_FLOOR: u8 = 24;
/// Widest prefix inflation may produce for IPv6 (a /24-equivalent radius).
const V6_PREFIX_FLOOR: u8 = 120;

/// True if the address carries signal worth learning or screening.
fn is_relevant(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified() || v4.is_loopback() || v4.is_private() || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            !(v6.is_unspecified()
                || v6.is_loopback()
                // fe80::/10 link-local and fc00::/7 unique-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || (v6.segments()[0] & 0xfe00) == 0xfc00)
        }
    }
}

/// Public addresses observed in one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetProfile {
    addrs: Vec<IpAddr>,
}

impl IpSetProfile {
    /// Profile a set of raw addresses, discarding irrelevant ones.
    pub fn from_addrs<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        IpSetProfile {
            addrs: addrs.into_iter().filter(is_relevant).collect(),
        }
    }

    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }
}

/// Deduplicated accumulation of observed addresses.
///
/// The dedup index is built lazily on first `add` after construction or
/// deserialization, and released by `clear`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpSetPile {
    addrs: Vec<IpAddr>,
    #[serde(skip)]
    index: Option<HashSet<IpAddr>>,
}

impl PartialEq for IpSetPile {
    fn eq(&self, other: &Self) -> bool {
        self.addrs == other.addrs
    }
}

impl IpSetPile {
    fn index(&mut self) -> &mut HashSet<IpAddr> {
        if self.index.is_none() {
            self.index = Some(self.addrs.iter().copied().collect());
        }
        self.index.as_mut().unwrap()
    }

    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }
}

impl Pile for IpSetPile {
    type Profile = IpSetProfile;

    fn add(&mut self, profile: &IpSetProfile) {
        for addr in &profile.addrs {
            if self.index().insert(*addr) {
                self.addrs.push(*addr);
            }
        }
    }

    fn merge(&mut self, other: Self) {
        for addr in other.addrs {
            if self.index().insert(addr) {
                self.addrs.push(addr);
            }
        }
    }

    fn clear(&mut self) {
        self.addrs.clear();
        self.index = None;
    }
}

/// Ordered per-family CIDR lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetCriteria {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

/// Smallest prefix length under which both v4 addresses share a network.
fn common_prefix_v4(a: Ipv4Addr, b: Ipv4Addr) -> u8 {
    (u32::from(a) ^ u32::from(b)).leading_zeros().min(32) as u8
}

fn common_prefix_v6(a: Ipv6Addr, b: Ipv6Addr) -> u8 {
    (u128::from(a) ^ u128::from(b)).leading_zeros().min(128) as u8
}

/// Try to widen `net` so it covers `addr`, bounded by the prefix floor.
/// Returns the widened net, or `None` when the bound would be violated.
fn inflate_v4(net: &Ipv4Net, addr: Ipv4Addr) -> Option<Ipv4Net> {
    if net.contains(&addr) {
        return Some(*net);
    }
    let prefix = net.prefix_len().min(common_prefix_v4(net.addr(), addr));
    if prefix < V4_PREFIX_FLOOR {
        return None;
    }
    // prefix <= 32 by construction, unwrap cannot fail
    Some(Ipv4Net::new(net.addr(), prefix).unwrap().trunc())
}

fn inflate_v6(net: &Ipv6Net, addr: Ipv6Addr) -> Option<Ipv6Net> {
    if net.contains(&addr) {
        return Some(*net);
    }
    let prefix = net.prefix_len().min(common_prefix_v6(net.addr(), addr));
    if prefix < V6_PREFIX_FLOOR {
        return None;
    }
    Some(Ipv6Net::new(net.addr(), prefix).unwrap().trunc())
}

impl IpSetCriteria {
    fn learn_addr(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(v4) => {
                for net in self.v4.iter_mut() {
                    if let Some(widened) = inflate_v4(net, v4) {
                        *net = widened;
                        return;
                    }
                }
                self.v4.push(Ipv4Net::new(v4, 32).unwrap());
            }
            IpAddr::V6(v6) => {
                for net in self.v6.iter_mut() {
                    if let Some(widened) = inflate_v6(net, v6) {
                        *net = widened;
                        return;
                    }
                }
                self.v6.push(Ipv6Net::new(v6, 128).unwrap());
            }
        }
    }

    fn contains(&self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.v4.iter().any(|net| net.contains(v4)),
            IpAddr::V6(v6) => self.v6.iter().any(|net| net.contains(v6)),
        }
    }
}

impl Criteria for IpSetCriteria {
    type Profile = IpSetProfile;
    type Pile = IpSetPile;

    fn learn(&mut self, pile: &IpSetPile) {
        self.v4.clear();
        self.v6.clear();
        for addr in &pile.addrs {
            self.learn_addr(*addr);
        }
    }

    fn fuse(&mut self, other: &Self) {
        // Inflate-first in both directions, then containment absorption,
        // else append. No later coalescing pass.
        for incoming in &other.v4 {
            let mut absorbed = false;
            for net in self.v4.iter_mut() {
                if let Some(w) =
                    inflate_v4(net, incoming.addr()).filter(|w| w.contains(&incoming.broadcast()))
                {
                    *net = w;
                    absorbed = true;
                    break;
                }
                if net.contains(&incoming.addr()) && net.contains(&incoming.broadcast()) {
                    absorbed = true;
                    break;
                }
                if incoming.contains(&net.addr()) && incoming.contains(&net.broadcast()) {
                    *net = *incoming;
                    absorbed = true;
                    break;
                }
            }
            if !absorbed {
                self.v4.push(*incoming);
            }
        }
        for incoming in &other.v6 {
            let mut absorbed = false;
            for net in self.v6.iter_mut() {
                if let Some(w) =
                    inflate_v6(net, incoming.addr()).filter(|w| w.contains(&incoming.broadcast()))
                {
                    *net = w;
                    absorbed = true;
                    break;
                }
                if net.contains(&incoming.addr()) && net.contains(&incoming.broadcast()) {
                    absorbed = true;
                    break;
                }
                if incoming.contains(&net.addr()) && incoming.contains(&net.broadcast()) {
                    *net = *incoming;
                    absorbed = true;
                    break;
                }
            }
            if !absorbed {
                self.v6.push(*incoming);
            }
        }
    }

    fn decide(&self, profile: &IpSetProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        for addr in &profile.addrs {
            if !is_relevant(addr) {
                continue;
            }
            if !self.contains(addr) {
                builder.reason(2, format!("address {addr} outside learned ranges"));
            }
        }
        builder.build()
    }
}
