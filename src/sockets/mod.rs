//! Socket table normalisation and the text parsers used by the command-based
//! platform readers.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::debug;

use crate::core::{Protocol, SocketEntry, SocketState};

/// Fold an IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) to plain IPv4.
pub fn fold_mapped(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        IpAddr::V4(_) => addr,
    }
}

/// Deduplicate and order a raw socket listing.
///
/// Entries sharing a platform handle are one socket listed once per process
/// holding it; the lowest PID is kept. Entries equal in protocol, address,
/// port and owner describe the same binding and are reported once. Distinct
/// bind addresses always stay distinct. The result is ordered by protocol,
/// port, then address.
pub fn normalize(entries: Vec<SocketEntry>) -> Vec<SocketEntry> {
    let mut by_handle: BTreeMap<(Protocol, u64), SocketEntry> = BTreeMap::new();
    let mut unhandled = Vec::new();

    for entry in entries {
        let entry = SocketEntry {
            local_address: fold_mapped(entry.local_address),
            ..entry
        };
        let Some(handle) = entry.handle else {
            unhandled.push(entry);
            continue;
        };
        match by_handle.entry((entry.protocol, handle)) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => {
                if owner_rank(entry.owner) < owner_rank(slot.get().owner) {
                    slot.insert(entry);
                }
            }
        }
    }

    let mut out: Vec<SocketEntry> = by_handle.into_values().chain(unhandled).collect();
    out.sort_by_key(sort_key);
    let before = out.len();
    out.dedup_by(|a, b| sort_key(a) == sort_key(b));
    if out.len() != before {
        debug!(removed = before - out.len(), "collapsed duplicate socket bindings");
    }
    out
}

fn owner_rank(owner: Option<u32>) -> (bool, u32) {
    match owner {
        Some(pid) => (false, pid),
        None => (true, 0),
    }
}

fn sort_key(entry: &SocketEntry) -> (Protocol, u16, IpAddr, (bool, u32)) {
    (
        entry.protocol,
        entry.local_port,
        entry.local_address,
        owner_rank(entry.owner),
    )
}

/// Parse `host:port` as printed by lsof and netstat: IPv6 hosts may be
/// bracketed and carry a `%zone` suffix, `*` stands for the wildcard address.
pub fn parse_endpoint(s: &str, wildcard: IpAddr) -> Option<(IpAddr, u16)> {
    let (host, port) = s.trim().rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.split('%').next().unwrap_or(host);
    let addr = if host.is_empty() || host == "*" {
        wildcard
    } else {
        host.parse::<IpAddr>().ok()?
    };
    Some((addr, port))
}

/// Parse `lsof -nP -i<proto>` output. TCP lines must be in LISTEN; UDP lines
/// with a remote peer (`->`) are skipped. The DEVICE column becomes the
/// socket handle.
pub fn parse_lsof(stdout: &str, protocol: Protocol) -> Vec<SocketEntry> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 || fields[0] == "COMMAND" {
            continue;
        }
        if !fields[7].eq_ignore_ascii_case(protocol.as_str()) {
            continue;
        }
        let name = fields[8];
        if name.contains("->") {
            continue;
        }
        let listening = fields[9..].iter().any(|f| *f == "(LISTEN)");
        if protocol == Protocol::Tcp && !listening {
            continue;
        }

        let wildcard = if fields[4] == "IPv6" {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let Some((local_address, local_port)) = parse_endpoint(name, wildcard) else {
            debug!(line, "skipping unparseable lsof line");
            continue;
        };

        out.push(SocketEntry {
            protocol,
            local_address,
            local_port,
            state: state_for(protocol),
            owner: fields[1].parse::<u32>().ok(),
            handle: parse_device(fields[5]),
        });
    }
    out
}

fn parse_device(s: &str) -> Option<u64> {
    let hex = s.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Parse Windows `netstat -ano -p <proto>` output. A TCP row is listening
/// when its state is LISTENING or its foreign port is 0, which also holds for
/// localised state names. PID 0 means the owner is not exposed.
pub fn parse_netstat(stdout: &str, protocol: Protocol) -> Vec<SocketEntry> {
    let wildcard = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let mut out = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(proto) = fields.first() else {
            continue;
        };
        if !proto.eq_ignore_ascii_case(protocol.as_str()) {
            continue;
        }

        let (local, pid) = match protocol {
            Protocol::Tcp => {
                if fields.len() < 5 {
                    continue;
                }
                let foreign_port = parse_endpoint(fields[2], wildcard).map(|(_, port)| port);
                if fields[3] != "LISTENING" && foreign_port != Some(0) {
                    continue;
                }
                (fields[1], fields[4])
            }
            Protocol::Udp => {
                if fields.len() < 4 {
                    continue;
                }
                (fields[1], fields[fields.len() - 1])
            }
        };

        let Some((local_address, local_port)) = parse_endpoint(local, wildcard) else {
            debug!(line, "skipping unparseable netstat line");
            continue;
        };
        out.push(SocketEntry {
            protocol,
            local_address,
            local_port,
            state: state_for(protocol),
            owner: pid.parse::<u32>().ok().filter(|pid| *pid != 0),
            handle: None,
        });
    }
    out
}

pub fn state_for(protocol: Protocol) -> SocketState {
    match protocol {
        Protocol::Tcp => SocketState::Listen,
        Protocol::Udp => SocketState::Bound,
    }
}
