//! Connection-ownership lookup backed by `/proc/net`.
//!
//! The kernel socket tables list the owning uid of every socket. Addresses
//! are printed as native-endian 32-bit words in hex, ports as big-endian hex.

use super::connection::{ConnectionOwnerLookup, ConnectionTuple, Protocol};
use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

/// Reads `/proc/net/{tcp,tcp6,udp,udp6,icmp,icmp6}`.
pub struct ProcNetLookup {
    root: PathBuf,
}

impl Default for ProcNetLookup {
    fn default() -> Self {
        Self::new("/proc/net")
    }
}

impl ProcNetLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tables(protocol: Protocol) -> &'static [&'static str] {
        match protocol {
            Protocol::Tcp => &["tcp", "tcp6"],
            Protocol::Udp => &["udp", "udp6"],
            Protocol::Icmp => &["icmp"],
            Protocol::Icmpv6 => &["icmp6"],
        }
    }
}

impl ConnectionOwnerLookup for ProcNetLookup {
    fn connection_owner_uid(&self, tuple: &ConnectionTuple) -> Result<u32> {
        // Connected sockets win over wildcard listeners.
        let mut wildcard = None;

        for table in Self::tables(tuple.protocol) {
            let path = self.root.join(table);
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::trace!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            for entry in contents.lines().skip(1).filter_map(parse_socket_line) {
                match entry.matches(tuple) {
                    Match::Exact => return Ok(entry.uid),
                    Match::Wildcard if wildcard.is_none() => wildcard = Some(entry.uid),
                    _ => {}
                }
            }
        }

        wildcard.ok_or_else(|| Error::connection_lookup(format!("no socket owns {}", tuple)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketEntry {
    local: SocketAddr,
    remote: SocketAddr,
    uid: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum Match {
    Exact,
    Wildcard,
    Miss,
}

impl SocketEntry {
    fn matches(&self, tuple: &ConnectionTuple) -> Match {
        if self.local.port() != tuple.source.port() {
            return Match::Miss;
        }

        let local_ip = canonical_ip(self.local.ip());
        let remote_ip = canonical_ip(self.remote.ip());
        let source_ip = canonical_ip(tuple.source.ip());
        let destination_ip = canonical_ip(tuple.destination.ip());

        if local_ip == source_ip
            && remote_ip == destination_ip
            && self.remote.port() == tuple.destination.port()
        {
            return Match::Exact;
        }

        // Unconnected datagram sockets and ping sockets have no remote end.
        let local_ok = local_ip == source_ip || local_ip.is_unspecified();
        let remote_unset = remote_ip.is_unspecified() && self.remote.port() == 0;
        if local_ok && remote_unset && tuple.protocol != Protocol::Tcp {
            Match::Wildcard
        } else {
            Match::Miss
        }
    }
}

/// Unwrap IPv4-mapped IPv6 addresses so dual-stack sockets compare equal.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Parse one row of a `/proc/net` socket table.
fn parse_socket_line(line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    // sl local rem st tx:rx tr:when retrnsmt uid ...
    if fields.len() < 8 {
        return None;
    }
    let local = parse_hex_socket_addr(fields[1])?;
    let remote = parse_hex_socket_addr(fields[2])?;
    let uid = fields[7].parse().ok()?;
    Some(SocketEntry { local, remote, uid })
}

fn parse_hex_socket_addr(field: &str) -> Option<SocketAddr> {
    let (ip_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = match ip_hex.len() {
        8 => {
            let word = u32::from_str_radix(ip_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(ip_hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}
