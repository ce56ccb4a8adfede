//! Pod-level peer discovery.
//!
//! The gate periodically snapshots which remote peers the pod currently
//! holds established TCP connections to, and screens that set against the
//! learned pod boundary. On Linux the snapshot comes from `/proc/net/tcp`
//! and `/proc/net/tcp6`; tests inject a static source.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

/// TCP state code for ESTABLISHED in procfs socket tables.
const TCP_ESTABLISHED: u8 = 1;

/// Supplier of the pod's current remote peers.
pub trait PeerSource: Send + Sync {
    fn peers(&self) -> anyhow::Result<Vec<IpAddr>>;
}

/// Reads established connections from the procfs socket tables.
pub struct ProcNetSource {
    tcp4: PathBuf,
    tcp6: PathBuf,
}

impl Default for ProcNetSource {
    fn default() -> Self {
        ProcNetSource {
            tcp4: PathBuf::from("/proc/net/tcp"),
            tcp6: PathBuf::from("/proc/net/tcp6"),
        }
    }
}

impl ProcNetSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_paths(tcp4: PathBuf, tcp6: PathBuf) -> Self {
        ProcNetSource { tcp4, tcp6 }
    }
}

impl PeerSource for ProcNetSource {
    fn peers(&self) -> anyhow::Result<Vec<IpAddr>> {
        let mut out = Vec::new();
        let v4 = std::fs::read_to_string(&self.tcp4)
            .with_context(|| format!("reading {}", self.tcp4.display()))?;
        collect_peers(&v4, parse_hex_v4, &mut out);
        match std::fs::read_to_string(&self.tcp6) {
            Ok(v6) => collect_peers(&v6, parse_hex_v6, &mut out),
            // Kernels without IPv6 have no tcp6 table.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.tcp6.display(), error = %err, "skipping tcp6 table");
            }
        }
        Ok(out)
    }
}

fn collect_peers(table: &str, parse: fn(&str) -> Option<IpAddr>, out: &mut Vec<IpAddr>) {
    // First line is the column header.
    for line in table.lines().skip(1) {
        if let Some(addr) = parse_line(line, parse) {
            out.push(addr);
        }
    }
}

/// Parse one socket-table row, keeping only ESTABLISHED remote endpoints.
///
/// Row shape: `sl local_address rem_address st ...` where addresses are
/// `HEXADDR:HEXPORT` and `st` is a hex state code.
fn parse_line(line: &str, parse: fn(&str) -> Option<IpAddr>) -> Option<IpAddr> {
    let mut fields = line.split_whitespace();
    let _sl = fields.next()?;
    let _local = fields.next()?;
    let remote = fields.next()?;
    let state = fields.next()?;
    if u8::from_str_radix(state, 16).ok()? != TCP_ESTABLISHED {
        return None;
    }
    let (addr_hex, _port) = remote.split_once(':')?;
    parse(addr_hex)
}

/// Kernel encodes IPv4 addresses as one little-endian u32 in hex.
fn parse_hex_v4(hex: &str) -> Option<IpAddr> {
    if hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(raw.swap_bytes())))
}

/// IPv6 addresses are four little-endian u32 groups in hex.
fn parse_hex_v6(hex: &str) -> Option<IpAddr> {
    if hex.len() != 32 {
        return None;
    }
    let mut octets = [0u8; 16];
    for (i, chunk) in hex.as_bytes().chunks(8).enumerate() {
        let group = std::str::from_utf8(chunk).ok()?;
        let raw = u32::from_str_radix(group, 16).ok()?.swap_bytes();
        octets[i * 4..i * 4 + 4].copy_from_slice(&raw.to_be_bytes());
    }
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

/// Fixed peer list for tests and non-Linux development.
pub struct StaticSource(pub Vec<IpAddr>);

impl PeerSource for StaticSource {
    fn peers(&self) -> anyhow::Result<Vec<IpAddr>> {
        Ok(self.0.clone())
    }
}
