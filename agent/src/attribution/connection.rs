//! Connection tuples and the OS connection-ownership lookup seam.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// First platform version with OS-level connection-ownership lookup.
pub const CONNECTION_OWNER_MIN_VERSION: u32 = 29;

/// IP protocol numbers.
pub const IPPROTO_ICMP: i32 = 1;
pub const IPPROTO_TCP: i32 = 6;
pub const IPPROTO_UDP: i32 = 17;
pub const IPPROTO_ICMPV6: i32 = 58;

/// Transport protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
}

impl Protocol {
    /// Map an IP protocol number to a protocol.
    pub fn from_number(number: i32) -> Result<Self> {
        match number {
            IPPROTO_ICMP => Ok(Self::Icmp),
            IPPROTO_ICMPV6 => Ok(Self::Icmpv6),
            IPPROTO_TCP => Ok(Self::Tcp),
            IPPROTO_UDP => Ok(Self::Udp),
            other => Err(Error::connection_lookup(format!(
                "unsupported ip protocol {}",
                other
            ))),
        }
    }

    /// IP protocol number.
    pub fn number(self) -> i32 {
        match self {
            Self::Icmp => IPPROTO_ICMP,
            Self::Icmpv6 => IPPROTO_ICMPV6,
            Self::Tcp => IPPROTO_TCP,
            Self::Udp => IPPROTO_UDP,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => write!(f, "icmp"),
            Self::Icmpv6 => write!(f, "icmpv6"),
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "icmp" => Ok(Self::Icmp),
            "icmpv6" | "icmp6" => Ok(Self::Icmpv6),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(Error::config(format!("Unknown protocol: {}", s))),
        }
    }
}

/// A live connection as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTuple {
    pub protocol: Protocol,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl ConnectionTuple {
    pub fn new(protocol: Protocol, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            protocol,
            source,
            destination,
        }
    }

    /// Build a tuple from the raw values the engine passes across its
    /// callback boundary.
    pub fn from_raw(
        protocol: i32,
        source_ip: &str,
        source_port: i32,
        destination_ip: &str,
        destination_port: i32,
    ) -> Result<Self> {
        let protocol = Protocol::from_number(protocol)?;
        let source = socket_addr(source_ip, source_port)?;
        let destination = socket_addr(destination_ip, destination_port)?;
        Ok(Self::new(protocol, source, destination))
    }
}

impl std::fmt::Display for ConnectionTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} -> {}", self.protocol, self.source, self.destination)
    }
}

fn socket_addr(ip: &str, port: i32) -> Result<SocketAddr> {
    let trimmed = ip.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = trimmed
        .parse()
        .map_err(|_| Error::connection_lookup(format!("invalid address '{}'", ip)))?;
    let port = u16::try_from(port)
        .map_err(|_| Error::connection_lookup(format!("invalid port {}", port)))?;
    Ok(SocketAddr::new(ip, port))
}

/// OS facility mapping an active connection to its owning uid.
pub trait ConnectionOwnerLookup: Send + Sync {
    fn connection_owner_uid(&self, tuple: &ConnectionTuple) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_numbers() {
        for protocol in [Protocol::Icmp, Protocol::Icmpv6, Protocol::Tcp, Protocol::Udp] {
            assert_eq!(Protocol::from_number(protocol.number()).unwrap(), protocol);
        }
        assert!(Protocol::from_number(132).is_err());
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("icmp6".parse::<Protocol>().unwrap(), Protocol::Icmpv6);
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_tuple_from_raw_v4() {
        let tuple = ConnectionTuple::from_raw(6, "10.0.0.2", 40000, "1.1.1.1", 443).unwrap();
        assert_eq!(tuple.protocol, Protocol::Tcp);
        assert_eq!(tuple.source, "10.0.0.2:40000".parse().unwrap());
        assert_eq!(tuple.destination, "1.1.1.1:443".parse().unwrap());
        assert_eq!(tuple.to_string(), "tcp 10.0.0.2:40000 -> 1.1.1.1:443");
    }

    #[test]
    fn test_tuple_from_raw_v6_bracketed() {
        let tuple =
            ConnectionTuple::from_raw(17, "[fdfe:dcba:9876::2]", 5353, "2001:4860:4860::8888", 53)
                .unwrap();
        assert_eq!(tuple.protocol, Protocol::Udp);
        assert!(tuple.source.is_ipv6());
        assert_eq!(tuple.destination.port(), 53);
    }

    #[test]
    fn test_tuple_from_raw_rejects_bad_input() {
        assert!(ConnectionTuple::from_raw(6, "not-an-ip", 1, "1.1.1.1", 443).is_err());
        assert!(ConnectionTuple::from_raw(6, "10.0.0.2", 70000, "1.1.1.1", 443).is_err());
        assert!(ConnectionTuple::from_raw(6, "10.0.0.2", -1, "1.1.1.1", 443).is_err());
        assert!(ConnectionTuple::from_raw(2, "10.0.0.2", 1, "1.1.1.1", 443).is_err());
    }
}
