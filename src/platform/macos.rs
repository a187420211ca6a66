use tracing::{debug, warn};

use crate::core::{FailureKind, FailureSource, OsInfo, PartialFailure, Protocol};
use crate::platform::{
    ProcessRead, ReadContext, SocketRead, SystemTables, exit_failure, is_elevated,
};
use crate::{processes, sockets};

/// `lsof` and `ps` based tables for macOS.
pub struct MacosTables;

impl SystemTables for MacosTables {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn read_sockets(&self, ctx: &ReadContext) -> SocketRead {
        let mut read = SocketRead::default();
        let mut entries = Vec::new();
        let mut succeeded = 0usize;

        for protocol in [Protocol::Tcp, Protocol::Udp] {
            if !ctx.wants(protocol) {
                continue;
            }
            let args: &[&str] = match protocol {
                Protocol::Tcp => &["-nP", "-iTCP", "-sTCP:LISTEN"],
                Protocol::Udp => &["-nP", "-iUDP"],
            };
            match ctx.run("lsof", args) {
                Ok(out) if out.exit_code == 0 => {
                    succeeded += 1;
                    entries.extend(sockets::parse_lsof(&out.stdout, protocol));
                }
                // lsof exits 1 when nothing matched.
                Ok(out) if out.exit_code == 1 && out.stdout.trim().is_empty() => {
                    succeeded += 1;
                }
                Ok(out) => {
                    warn!(protocol = %protocol, exit_code = out.exit_code, "lsof failed");
                    read.failures
                        .push(exit_failure(FailureSource::Sockets, "lsof", &out));
                }
                Err(err) => {
                    warn!(protocol = %protocol, error = %err, "lsof failed");
                    read.failures.push(err.into_failure(FailureSource::Sockets));
                }
            }
        }
        read.failed = succeeded == 0 && !read.failures.is_empty();

        if succeeded > 0 && !is_elevated() {
            read.failures.push(PartialFailure::source(
                FailureSource::Sockets,
                FailureKind::PermissionDenied,
                "sockets of other users are hidden without root; run with sudo for a complete listing",
            ));
        }
        debug!(count = entries.len(), "read lsof socket listing");
        read.entries = sockets::normalize(entries);
        read
    }

    fn read_processes(&self, ctx: &ReadContext) -> ProcessRead {
        let mut read = match ctx.run("ps", &["-axww", "-o", "pid=,user=,comm="]) {
            Ok(out) if out.exit_code == 0 => ProcessRead {
                entries: processes::parse_ps_paths(&out.stdout),
                ..ProcessRead::default()
            },
            Ok(out) => {
                return ProcessRead {
                    failed: true,
                    failures: vec![exit_failure(FailureSource::Processes, "ps", &out)],
                    ..ProcessRead::default()
                };
            }
            Err(err) => {
                warn!(error = %err, "ps failed");
                return ProcessRead {
                    failed: true,
                    failures: vec![err.into_failure(FailureSource::Processes)],
                    ..ProcessRead::default()
                };
            }
        };

        // Command lines are an enrichment; the table stands without them.
        match ctx.run("ps", &["-axww", "-o", "pid=,args="]) {
            Ok(out) if out.exit_code == 0 => {
                let mut args = processes::parse_ps_args(&out.stdout);
                for entry in &mut read.entries {
                    entry.command_line = args.remove(&entry.pid);
                }
            }
            Ok(out) => read
                .failures
                .push(exit_failure(FailureSource::Processes, "ps args", &out)),
            Err(err) => read
                .failures
                .push(err.into_failure(FailureSource::Processes)),
        }
        debug!(count = read.entries.len(), "read ps process table");
        read
    }

    fn os_info(&self, ctx: &ReadContext) -> OsInfo {
        let first_line = |cmd: &str, args: &[&str]| {
            ctx.run(cmd, args)
                .ok()
                .filter(|out| out.exit_code == 0)
                .and_then(|out| out.stdout.lines().next().map(|l| l.trim().to_string()))
                .filter(|s| !s.is_empty())
        };
        OsInfo {
            name: "macOS".to_string(),
            version: first_line("sw_vers", &["-productVersion"])
                .unwrap_or_else(|| "unknown".to_string()),
            kernel: first_line("uname", &["-r"]).unwrap_or_else(|| "unknown".to_string()),
        }
    }
}
