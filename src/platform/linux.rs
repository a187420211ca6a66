//! Socket and process tables from `/proc`.

use std::collections::{HashMap, HashSet};

use procfs::ProcError;
use procfs::net::{TcpNetEntry, TcpState, UdpNetEntry};
use procfs::process::FDTarget;
use tracing::{debug, warn};

use crate::core::{
    FailureKind, FailureSource, OsInfo, PartialFailure, ProcessEntry, Protocol, SocketEntry,
    SocketState,
};
use crate::platform::{ProcessRead, ReadContext, SocketRead, SystemTables};
use crate::sockets;

pub struct LinuxTables;

type TableReader = fn() -> procfs::ProcResult<Vec<SocketEntry>>;

const SOCKET_TABLES: [(Protocol, &str, TableReader); 4] = [
    (Protocol::Tcp, "/proc/net/tcp", tcp_v4),
    (Protocol::Tcp, "/proc/net/tcp6", tcp_v6),
    (Protocol::Udp, "/proc/net/udp", udp_v4),
    (Protocol::Udp, "/proc/net/udp6", udp_v6),
];

impl SystemTables for LinuxTables {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn read_sockets(&self, ctx: &ReadContext) -> SocketRead {
        let mut read = SocketRead::default();
        let mut entries = Vec::new();
        let mut succeeded = 0usize;

        for (protocol, path, reader) in SOCKET_TABLES {
            if !ctx.wants(protocol) {
                continue;
            }
            if let Some(kind) = ctx.interruption() {
                read.failures.push(PartialFailure::source(
                    FailureSource::Sockets,
                    kind,
                    format!("{path}: not read"),
                ));
                continue;
            }
            match reader() {
                Ok(found) => {
                    debug!(table = path, count = found.len(), "read socket table");
                    succeeded += 1;
                    entries.extend(found);
                }
                Err(ProcError::NotFound(_)) if path.ends_with('6') => {
                    debug!(table = path, "IPv6 socket table absent");
                }
                Err(err) => {
                    warn!(table = path, error = %err, "socket table unreadable");
                    read.failures.push(PartialFailure::source(
                        FailureSource::Sockets,
                        proc_error_kind(&err),
                        format!("{path}: {err}"),
                    ));
                }
            }
        }
        read.failed = succeeded == 0 && !read.failures.is_empty();

        if !entries.is_empty() {
            attribute_owners(ctx, &mut entries, &mut read.failures);
        }
        read.entries = sockets::normalize(entries);
        read
    }

    fn read_processes(&self, ctx: &ReadContext) -> ProcessRead {
        let all = match procfs::process::all_processes() {
            Ok(all) => all,
            Err(err) => {
                warn!(error = %err, "process table unreadable");
                return ProcessRead::failure(
                    FailureSource::Processes,
                    proc_error_kind(&err),
                    format!("/proc: {err}"),
                );
            }
        };

        let mut read = ProcessRead::default();
        let mut users: HashMap<u32, Option<String>> = HashMap::new();
        for proc in all {
            if let Some(kind) = ctx.interruption() {
                read.failures.push(PartialFailure::source(
                    FailureSource::Processes,
                    kind,
                    "process table read stopped early",
                ));
                break;
            }
            let proc = match proc {
                Ok(proc) => proc,
                Err(err) => {
                    debug!(error = %err, "skipping process");
                    continue;
                }
            };
            let Ok(pid) = u32::try_from(proc.pid) else {
                continue;
            };
            if let Some((entry, failure)) = collect_process(&proc, pid, &mut users) {
                read.entries.push(entry);
                read.failures.extend(failure);
            }
        }
        read.failed = read.entries.is_empty() && !read.failures.is_empty();
        debug!(count = read.entries.len(), "read process table");
        read
    }

    fn os_info(&self, _ctx: &ReadContext) -> OsInfo {
        let (name, version) = std::fs::read_to_string("/etc/os-release")
            .map(|s| parse_os_release(&s))
            .unwrap_or((None, None));
        let kernel = std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty());
        OsInfo {
            name: name.unwrap_or_else(|| "Linux".to_string()),
            version: version.unwrap_or_else(|| "unknown".to_string()),
            kernel: kernel.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

fn tcp_v4() -> procfs::ProcResult<Vec<SocketEntry>> {
    procfs::net::tcp().map(tcp_listeners)
}

fn tcp_v6() -> procfs::ProcResult<Vec<SocketEntry>> {
    procfs::net::tcp6().map(tcp_listeners)
}

fn udp_v4() -> procfs::ProcResult<Vec<SocketEntry>> {
    procfs::net::udp().map(udp_bindings)
}

fn udp_v6() -> procfs::ProcResult<Vec<SocketEntry>> {
    procfs::net::udp6().map(udp_bindings)
}

fn tcp_listeners(entries: Vec<TcpNetEntry>) -> Vec<SocketEntry> {
    entries
        .into_iter()
        .filter(|e| e.state == TcpState::Listen)
        .map(|e| SocketEntry {
            protocol: Protocol::Tcp,
            local_address: e.local_address.ip(),
            local_port: e.local_address.port(),
            state: SocketState::Listen,
            owner: None,
            handle: Some(e.inode),
        })
        .collect()
}

/// Unconnected UDP sockets only; a connected socket is a client, not a
/// listener.
fn udp_bindings(entries: Vec<UdpNetEntry>) -> Vec<SocketEntry> {
    entries
        .into_iter()
        .filter(|e| e.remote_address.port() == 0)
        .map(|e| SocketEntry {
            protocol: Protocol::Udp,
            local_address: e.local_address.ip(),
            local_port: e.local_address.port(),
            state: SocketState::Bound,
            owner: None,
            handle: Some(e.inode),
        })
        .collect()
}

/// Map socket inodes to PIDs by walking every process's fd table. Processes
/// whose fds are hidden from us are counted and reported once.
fn attribute_owners(
    ctx: &ReadContext,
    entries: &mut [SocketEntry],
    failures: &mut Vec<PartialFailure>,
) {
    let wanted: HashSet<u64> = entries.iter().filter_map(|e| e.handle).collect();
    let all = match procfs::process::all_processes() {
        Ok(all) => all,
        Err(err) => {
            failures.push(PartialFailure::source(
                FailureSource::Sockets,
                proc_error_kind(&err),
                format!("socket owners unavailable: {err}"),
            ));
            return;
        }
    };

    let mut owners: HashMap<u64, u32> = HashMap::new();
    let mut denied = 0usize;
    for proc in all {
        if let Some(kind) = ctx.interruption() {
            failures.push(PartialFailure::source(
                FailureSource::Sockets,
                kind,
                "socket owner lookup stopped early",
            ));
            break;
        }
        let Ok(proc) = proc else {
            continue;
        };
        let Ok(pid) = u32::try_from(proc.pid) else {
            continue;
        };
        let fds = match proc.fd() {
            Ok(fds) => fds,
            Err(ProcError::PermissionDenied(_)) => {
                denied += 1;
                continue;
            }
            Err(_) => continue,
        };
        for fd in fds.flatten() {
            if let FDTarget::Socket(inode) = fd.target {
                if wanted.contains(&inode) {
                    owners
                        .entry(inode)
                        .and_modify(|owner| *owner = (*owner).min(pid))
                        .or_insert(pid);
                }
            }
        }
    }

    for entry in entries.iter_mut() {
        entry.owner = entry.handle.and_then(|inode| owners.get(&inode).copied());
    }

    if denied > 0 {
        debug!(denied, "fd tables hidden for some processes");
        failures.push(PartialFailure::source(
            FailureSource::Sockets,
            FailureKind::PermissionDenied,
            format!("socket owners hidden for {denied} processes; run as root for full attribution"),
        ));
    }
}

fn collect_process(
    proc: &procfs::process::Process,
    pid: u32,
    users: &mut HashMap<u32, Option<String>>,
) -> Option<(ProcessEntry, Option<PartialFailure>)> {
    let name = match proc.stat() {
        Ok(stat) => Some(stat.comm),
        // Exited between listing and reading.
        Err(ProcError::NotFound(_)) => return None,
        Err(err) => {
            debug!(pid, error = %err, "process stat unreadable");
            None
        }
    };

    let user = proc.uid().ok().map(|uid| {
        users
            .entry(uid)
            .or_insert_with(|| crate::platform::user_name_for_uid(uid))
            .clone()
            .unwrap_or_else(|| uid.to_string())
    });

    let (executable_path, failure) = match proc.exe() {
        Ok(path) => (Some(path.display().to_string()), None),
        Err(ProcError::PermissionDenied(_)) => (
            None,
            Some(PartialFailure::record(
                FailureSource::Processes,
                pid.to_string(),
                FailureKind::PermissionDenied,
                "executable path withheld",
            )),
        ),
        // Kernel threads have no executable.
        Err(_) => (None, None),
    };

    let command_line = proc.cmdline().ok().filter(|args| !args.is_empty());

    Some((
        ProcessEntry {
            pid,
            name,
            executable_path,
            command_line,
            user,
        },
        failure,
    ))
}

fn proc_error_kind(err: &ProcError) -> FailureKind {
    match err {
        ProcError::PermissionDenied(_) => FailureKind::PermissionDenied,
        ProcError::NotFound(_) | ProcError::Io(_, _) => FailureKind::Unavailable,
        ProcError::Incomplete(_) => FailureKind::ParseError,
        _ => FailureKind::Internal,
    }
}

fn parse_os_release(text: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "NAME" => name = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }
    (name, version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CancelToken;
    use std::time::Duration;

    #[test]
    fn parse_os_release_reads_name_and_version() {
        let text = "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nID=ubuntu\n";
        assert_eq!(
            parse_os_release(text),
            (Some("Ubuntu".to_string()), Some("24.04".to_string()))
        );
    }

    #[test]
    fn process_table_contains_this_process() {
        let ctx = ReadContext::new(
            Duration::from_secs(10),
            vec![Protocol::Tcp, Protocol::Udp],
            CancelToken::new(),
        );
        let read = LinuxTables.read_processes(&ctx);
        assert!(!read.failed);
        let me = std::process::id();
        let entry = read
            .entries
            .iter()
            .find(|p| p.pid == me)
            .expect("own process listed");
        assert!(entry.executable_path.is_some());
    }

    #[test]
    fn process_read_out_of_time_counts_as_failed() {
        let ctx = ReadContext::new(Duration::ZERO, vec![Protocol::Tcp], CancelToken::new());
        let read = LinuxTables.read_processes(&ctx);
        assert!(read.entries.is_empty());
        assert!(read.failed);
        assert_eq!(read.failures[0].kind, FailureKind::Timeout);
    }

    #[test]
    fn cancelled_socket_read_reports_every_table() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = ReadContext::new(Duration::from_secs(10), vec![Protocol::Tcp], cancel);
        let read = LinuxTables.read_sockets(&ctx);
        assert!(read.failed);
        assert_eq!(read.failures.len(), 2);
        assert!(read
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::Cancelled));
    }
}
