use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{FailureKind, RiskAssessment, ScanReport, Severity};
use crate::error::ScanError;
use crate::rules::{Classifier, RISK_RULES};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

const PROCESS_COLUMN_CHARS: usize = 28;
const FAILURES_SHOWN: usize = 5;

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let failures = err
        .downcast_ref::<ScanError>()
        .map(ScanError::failures)
        .unwrap_or_default();
    if !failures.is_empty() {
        let _ = writeln!(stderr, "unreadable sources:");
        for failure in failures {
            let _ = writeln!(stderr, "  - {failure}");
        }
    }

    let _ = writeln!(stderr, "next:");
    if failures
        .iter()
        .any(|f| f.kind == FailureKind::PermissionDenied)
    {
        let _ = writeln!(
            stderr,
            "  - some tables need elevated privileges; re-run with sudo (or as Administrator)"
        );
    }
    let _ = writeln!(stderr, "  - re-run with `--verbose` for details");
    let _ = writeln!(
        stderr,
        "  - see `hostaudit --help` for available commands and options"
    );
}

pub fn print_scan(report: &ScanReport, cfg: &UiConfig, top_n: usize) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let s = &report.summary;
    let _ = writeln!(
        out,
        "host: {} {} (kernel {})  platform={}  started={}  took={}ms",
        report.os.name,
        report.os.version,
        report.os.kernel,
        report.platform,
        report.started_at,
        report.duration_ms
    );
    let _ = writeln!(
        out,
        "summary: {} findings (tcp={} udp={})  critical={} high={} medium={} low={} info={}",
        s.total_findings, s.tcp, s.udp, s.critical, s.high, s.medium, s.low, s.info
    );
    if s.degraded {
        let status = "DEGRADED";
        let status = if cfg.color {
            format!("\x1b[33m{status}\x1b[0m")
        } else {
            status.to_string()
        };
        let _ = writeln!(
            out,
            "status: {status} ({} sources / {} records unreadable)",
            s.unreadable_sources, s.unreadable_records
        );
    }
    for note in &s.notes {
        let _ = writeln!(out, "- {note}");
    }

    let total = report.findings.len();
    let rows = cfg.max_table_rows.min(top_n).min(total);

    let _ = writeln!(out);
    if total > rows {
        let _ = writeln!(out, "findings ({rows} shown / {total} total):");
    } else {
        let _ = writeln!(out, "findings ({rows} shown):");
    }
    if rows == 0 {
        let _ = writeln!(out, "  no listening sockets at or above the selected severity");
    } else {
        print_findings_table(&mut out, &report.findings, rows, cfg.color);
    }

    if !report.partial_failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "partial failures ({}):",
            report.partial_failures.len()
        );
        let shown = if cfg.verbose {
            report.partial_failures.len()
        } else {
            FAILURES_SHOWN.min(report.partial_failures.len())
        };
        for failure in report.partial_failures.iter().take(shown) {
            let _ = writeln!(out, "- {failure}");
        }
        if report.partial_failures.len() > shown {
            let _ = writeln!(
                out,
                "- ... ({} more; use --verbose)",
                report.partial_failures.len() - shown
            );
        }
    }

    if cfg.verbose {
        for finding in report.findings.iter().take(rows) {
            let Some(cmd) = finding.process().and_then(|p| p.command_line.as_ref()) else {
                continue;
            };
            let _ = writeln!(out, "  {}: {}", finding.socket().endpoint(), cmd.join(" "));
        }
    }
}

pub fn print_rules(classifier: &Classifier, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();

    let _ = writeln!(out, "classification rules (first match wins):");
    let matcher_w = classifier
        .rules()
        .map(|r| visible_width_ansi(&r.matcher.to_string()))
        .max()
        .unwrap_or(0);
    for rule in classifier.rules() {
        let _ = writeln!(
            out,
            "  {}  {:<13} {}",
            pad_end_display(&rule.matcher.to_string(), matcher_w),
            rule.category.as_str(),
            rule.service
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "risk rules (all matches apply; severity is the maximum):");
    let code_w = RISK_RULES
        .iter()
        .map(|r| r.code.len())
        .max()
        .unwrap_or(0);
    for rule in RISK_RULES {
        let severity = pad_end_ansi(&format_severity(rule.severity, cfg.color), 8);
        let _ = writeln!(
            out,
            "  {}  {severity}  {}",
            pad_end_display(rule.code, code_w),
            rule.when
        );
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[RiskAssessment], rows: usize, color: bool) {
    let label_sev = "SEVERITY";
    let label_proto = "PROTO";
    let label_endpoint = "LOCAL";
    let label_pid = "PID";
    let label_process = "PROCESS";
    let label_service = "SERVICE";
    let label_rationale = "RATIONALE";

    let shown = &findings[..rows];
    let endpoint_w = shown
        .iter()
        .map(|f| visible_width_ansi(&f.socket().endpoint()))
        .max()
        .unwrap_or(0)
        .max(label_endpoint.len());
    let pid_w = shown
        .iter()
        .map(|f| pid_label(f).len())
        .max()
        .unwrap_or(0)
        .max(label_pid.len());
    let process_w = shown
        .iter()
        .map(|f| visible_width_ansi(&process_label(f)))
        .max()
        .unwrap_or(0)
        .max(label_process.len());
    let service_w = shown
        .iter()
        .map(|f| visible_width_ansi(&service_label(f)))
        .max()
        .unwrap_or(0)
        .max(label_service.len());
    let sev_w = label_sev.len();
    let proto_w = label_proto.len();

    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}  {}  {}",
        pad_end_display(label_sev, sev_w),
        pad_end_display(label_proto, proto_w),
        pad_end_display(label_endpoint, endpoint_w),
        pad_start_display(label_pid, pid_w),
        pad_end_display(label_process, process_w),
        pad_end_display(label_service, service_w),
        label_rationale
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(proto_w),
        "-".repeat(endpoint_w),
        "-".repeat(pid_w),
        "-".repeat(process_w),
        "-".repeat(service_w),
        "-".repeat(label_rationale.len())
    );

    for finding in shown {
        let socket = finding.socket();
        let _ = writeln!(
            out,
            "{}  {}  {}  {}  {}  {}  {}",
            pad_end_ansi(&format_severity(finding.severity, color), sev_w),
            pad_end_display(socket.protocol.as_str(), proto_w),
            pad_end_display(&socket.endpoint(), endpoint_w),
            pad_start_display(&pid_label(finding), pid_w),
            pad_end_display(&process_label(finding), process_w),
            pad_end_display(&service_label(finding), service_w),
            finding.rationale.join(", ")
        );
    }
}

fn pid_label(f: &RiskAssessment) -> String {
    f.socket()
        .owner
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn process_label(f: &RiskAssessment) -> String {
    let name = f
        .process()
        .map(|p| p.display_name())
        .unwrap_or_else(|| "unknown".to_string());
    truncate_middle(&name, PROCESS_COLUMN_CHARS)
}

fn service_label(f: &RiskAssessment) -> String {
    let c = &f.classified;
    match &c.service {
        Some(service) => format!("{service} ({})", c.confidence),
        None => format!("{} ({})", c.category, c.confidence),
    }
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

pub fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Info => "90",
        Severity::Low => "32",
        Severity::Medium => "33",
        Severity::High => "31",
        Severity::Critical => "1;31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
