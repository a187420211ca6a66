//! Process table parsers for the command-based platform readers.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::core::{FailureKind, FailureSource, PartialFailure, ProcessEntry};

/// Parse `ps -axww -o pid=,user=,comm=`. The executable path is everything
/// after the user column and may contain spaces.
pub fn parse_ps_paths(stdout: &str) -> Vec<ProcessEntry> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((pid, rest)) = split_first_field(line) else {
            continue;
        };
        let Ok(pid) = pid.parse::<u32>() else {
            debug!(line, "skipping unparseable ps line");
            continue;
        };
        let (user, path) = match split_first_field(rest) {
            Some((user, path)) => (Some(user.to_string()), non_empty(path)),
            None => (non_empty(rest), None),
        };
        let name = path
            .as_deref()
            .map(|p| crate::core::file_name(p).to_string());
        out.push(ProcessEntry {
            pid,
            name,
            executable_path: path.filter(|p| p.starts_with('/')),
            command_line: None,
            user,
        });
    }
    out
}

/// Parse `ps -axww -o pid=,args=` into command lines keyed by PID.
///
/// `ps` prints arguments space-joined, so arguments that themselves contain
/// spaces cannot be recovered exactly.
pub fn parse_ps_args(stdout: &str) -> BTreeMap<u32, Vec<String>> {
    let mut out = BTreeMap::new();
    for line in stdout.lines() {
        let Some((pid, args)) = split_first_field(line.trim()) else {
            continue;
        };
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };
        let args: Vec<String> = args.split_whitespace().map(str::to_string).collect();
        if !args.is_empty() {
            out.insert(pid, args);
        }
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimProcess {
    process_id: u32,
    name: Option<String>,
    executable_path: Option<String>,
    command_line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CimOutput {
    Many(Vec<CimProcess>),
    One(CimProcess),
}

/// PIDs that never carry an executable path: the idle process and `System`.
const PATHLESS_PIDS: [u32; 2] = [0, 4];

/// Parse `Get-CimInstance Win32_Process | ConvertTo-Json`, which emits an
/// array, or a bare object when there is a single process. CIM reports a
/// null path for processes the caller may not inspect; each of those is
/// returned as a record failure next to its bare entry.
pub fn parse_cim_processes(
    stdout: &str,
) -> Result<(Vec<ProcessEntry>, Vec<PartialFailure>), serde_json::Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let parsed: CimOutput = serde_json::from_str(trimmed)?;
    let list = match parsed {
        CimOutput::Many(list) => list,
        CimOutput::One(one) => vec![one],
    };

    let mut failures = Vec::new();
    let entries = list
        .into_iter()
        .map(|p| {
            let executable_path = p.executable_path.and_then(|e| non_empty(&e));
            if executable_path.is_none() && !PATHLESS_PIDS.contains(&p.process_id) {
                failures.push(PartialFailure::record(
                    FailureSource::Processes,
                    p.process_id.to_string(),
                    FailureKind::PermissionDenied,
                    "executable path withheld",
                ));
            }
            ProcessEntry {
                pid: p.process_id,
                name: p.name.and_then(|n| non_empty(&n)),
                executable_path,
                command_line: p
                    .command_line
                    .map(|c| split_command_line(&c))
                    .filter(|args| !args.is_empty()),
                user: None,
            }
        })
        .collect();
    Ok((entries, failures))
}

/// Split a Windows-style command line on whitespace, honouring double quotes.
pub fn split_command_line(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

fn split_first_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let idx = s.find(char::is_whitespace)?;
    Some((&s[..idx], s[idx..].trim()))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}
