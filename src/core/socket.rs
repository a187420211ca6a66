use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("invalid protocol: {other} (expected tcp|udp)")),
        }
    }
}

/// TCP sockets are only collected in LISTEN; UDP has no listen state, so an
/// unconnected bound socket is reported as `BOUND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SocketState {
    #[serde(rename = "LISTEN")]
    Listen,
    #[serde(rename = "BOUND")]
    Bound,
}

/// How widely a bind address is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exposure {
    Loopback,
    Interface,
    AllInterfaces,
}

impl Exposure {
    pub fn of(addr: IpAddr) -> Self {
        if addr.is_loopback() {
            Exposure::Loopback
        } else if addr.is_unspecified() {
            Exposure::AllInterfaces
        } else {
            Exposure::Interface
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Exposure::Loopback => "loopback",
            Exposure::Interface => "interface",
            Exposure::AllInterfaces => "all-interfaces",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketEntry {
    pub protocol: Protocol,
    pub local_address: IpAddr,
    pub local_port: u16,
    pub state: SocketState,
    #[serde(
        rename = "owner_pid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub owner: Option<u32>,
    /// Platform socket identity (inode, lsof device). Only used to detect the
    /// same socket being listed twice.
    #[serde(skip)]
    pub handle: Option<u64>,
}

impl SocketEntry {
    pub fn exposure(&self) -> Exposure {
        Exposure::of(self.local_address)
    }

    pub fn endpoint(&self) -> String {
        match self.local_address {
            IpAddr::V4(v4) => format!("{v4}:{}", self.local_port),
            IpAddr::V6(v6) => format!("[{v6}]:{}", self.local_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn exposure_distinguishes_loopback_wildcard_and_interface() {
        assert_eq!(
            Exposure::of(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Exposure::Loopback
        );
        assert_eq!(
            Exposure::of(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            Exposure::Loopback
        );
        assert_eq!(
            Exposure::of(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Exposure::AllInterfaces
        );
        assert_eq!(
            Exposure::of(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            Exposure::AllInterfaces
        );
        assert_eq!(
            Exposure::of("192.168.1.20".parse().expect("ip")),
            Exposure::Interface
        );
    }

    #[test]
    fn endpoint_brackets_ipv6() {
        let entry = SocketEntry {
            protocol: Protocol::Tcp,
            local_address: IpAddr::V6(Ipv6Addr::LOCALHOST),
            local_port: 5432,
            state: SocketState::Listen,
            owner: None,
            handle: None,
        };
        assert_eq!(entry.endpoint(), "[::1]:5432");
    }
}
