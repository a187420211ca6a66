use std::collections::HashMap;

use tracing::debug;

use crate::core::{
    CorrelatedFinding, FailureKind, FailureSource, PartialFailure, ProcessEntry, SocketEntry,
};

/// Join every socket to the process that owns it. Each socket yields exactly
/// one finding, in input order; an owner missing from the process table (it
/// exited between the two reads, or was never visible) leaves `process`
/// empty. When the process table lists a PID twice the first entry wins.
pub fn correlate(sockets: &[SocketEntry], processes: &[ProcessEntry]) -> Vec<CorrelatedFinding> {
    let mut by_pid: HashMap<u32, &ProcessEntry> = HashMap::with_capacity(processes.len());
    for process in processes {
        by_pid.entry(process.pid).or_insert(process);
    }

    let mut unmatched = 0usize;
    let findings: Vec<CorrelatedFinding> = sockets
        .iter()
        .map(|socket| {
            let process = socket
                .owner
                .and_then(|pid| by_pid.get(&pid))
                .map(|p| (*p).clone());
            if socket.owner.is_some() && process.is_none() {
                unmatched += 1;
            }
            CorrelatedFinding {
                socket: socket.clone(),
                process,
            }
        })
        .collect();

    if unmatched > 0 {
        debug!(unmatched, "socket owners missing from the process table");
    }
    findings
}

/// One report-level failure when the platform attributed none of the
/// sockets to a process.
pub fn owner_visibility_failure(sockets: &[SocketEntry]) -> Option<PartialFailure> {
    if sockets.is_empty() || sockets.iter().any(|s| s.owner.is_some()) {
        return None;
    }
    Some(PartialFailure::source(
        FailureSource::Correlation,
        FailureKind::PermissionDenied,
        format!(
            "no socket owners were exposed; process is unknown for all {} sockets",
            sockets.len()
        ),
    ))
}
