use tracing::{debug, warn};

use crate::core::{FailureKind, FailureSource, OsInfo, Protocol};
use crate::platform::{ProcessRead, ReadContext, SocketRead, SystemTables, exit_failure};
use crate::{processes, sockets};

const NETSTAT_TABLES: [(Protocol, &str); 4] = [
    (Protocol::Tcp, "TCP"),
    (Protocol::Tcp, "TCPv6"),
    (Protocol::Udp, "UDP"),
    (Protocol::Udp, "UDPv6"),
];

const CIM_QUERY: &str = "Get-CimInstance Win32_Process \
    | Select-Object ProcessId,Name,ExecutablePath,CommandLine \
    | ConvertTo-Json -Compress";

/// `netstat` and CIM based tables for Windows.
pub struct WindowsTables;

impl SystemTables for WindowsTables {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn read_sockets(&self, ctx: &ReadContext) -> SocketRead {
        let mut read = SocketRead::default();
        let mut entries = Vec::new();
        let mut succeeded = 0usize;

        for (protocol, table) in NETSTAT_TABLES {
            if !ctx.wants(protocol) {
                continue;
            }
            match ctx.run("netstat", &["-ano", "-p", table]) {
                Ok(out) if out.exit_code == 0 => {
                    succeeded += 1;
                    entries.extend(sockets::parse_netstat(&out.stdout, protocol));
                }
                Ok(out) => {
                    warn!(table, exit_code = out.exit_code, "netstat failed");
                    read.failures
                        .push(exit_failure(FailureSource::Sockets, "netstat", &out));
                }
                Err(err) => {
                    warn!(table, error = %err, "netstat failed");
                    read.failures.push(err.into_failure(FailureSource::Sockets));
                }
            }
        }
        read.failed = succeeded == 0 && !read.failures.is_empty();
        debug!(count = entries.len(), "read netstat socket listing");
        read.entries = sockets::normalize(entries);
        read
    }

    fn read_processes(&self, ctx: &ReadContext) -> ProcessRead {
        let out = match ctx.run(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", CIM_QUERY],
        ) {
            Ok(out) if out.exit_code == 0 => out,
            Ok(out) => {
                return ProcessRead {
                    failed: true,
                    failures: vec![exit_failure(FailureSource::Processes, "powershell", &out)],
                    ..ProcessRead::default()
                };
            }
            Err(err) => {
                warn!(error = %err, "process query failed");
                return ProcessRead {
                    failed: true,
                    failures: vec![err.into_failure(FailureSource::Processes)],
                    ..ProcessRead::default()
                };
            }
        };

        match processes::parse_cim_processes(&out.stdout) {
            Ok((entries, failures)) => {
                debug!(
                    count = entries.len(),
                    withheld = failures.len(),
                    "read CIM process table"
                );
                ProcessRead {
                    entries,
                    failures,
                    failed: false,
                }
            }
            Err(err) => ProcessRead::failure(
                FailureSource::Processes,
                FailureKind::ParseError,
                format!("Win32_Process output: {err}"),
            ),
        }
    }

    fn os_info(&self, ctx: &ReadContext) -> OsInfo {
        let version = ctx
            .run("cmd", &["/C", "ver"])
            .ok()
            .filter(|out| out.exit_code == 0)
            .and_then(|out| parse_ver(&out.stdout));
        OsInfo {
            name: "Windows".to_string(),
            kernel: version.clone().unwrap_or_else(|| "unknown".to_string()),
            version: version.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// `Microsoft Windows [Version 10.0.22631.4317]` -> `10.0.22631.4317`.
fn parse_ver(stdout: &str) -> Option<String> {
    let start = stdout.find('[')?;
    let end = stdout[start..].find(']')? + start;
    let inner = &stdout[start + 1..end];
    let version = inner.rsplit(' ').next()?.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ver_extracts_build_number() {
        assert_eq!(
            parse_ver("\r\nMicrosoft Windows [Version 10.0.22631.4317]\r\n").as_deref(),
            Some("10.0.22631.4317")
        );
        assert_eq!(parse_ver("no brackets"), None);
    }
}
