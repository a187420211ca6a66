use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::TIMEOUT_SECS_RANGE;
use crate::core::{ScanReport, Severity};
use crate::engine::{Engine, EngineOptions};
use crate::platform::CancelToken;
use crate::rules::Classifier;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "hostaudit",
    version,
    about = "Audit listening sockets: which process owns them, what service they are, and how risky the exposure is"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Budget in seconds for reading the socket and process tables.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Scan(ScanArgs),
    Rules,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[arg(long)]
    pub markdown: bool,
    #[arg(long, default_value_t = 20)]
    pub top: usize,
    /// Hide findings below this severity (summary counts still cover the whole scan).
    #[arg(long)]
    pub min_severity: Option<Severity>,
    /// Exit with status 1 when any finding is at or above this severity.
    #[arg(long)]
    pub fail_on: Option<Severity>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("HOSTAUDIT_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    if let Some(timeout) = cli.timeout {
        if !TIMEOUT_SECS_RANGE.contains(&timeout) {
            return Err(crate::exit::invalid_args(format!(
                "--timeout must be within {}..={} seconds (got {timeout})",
                TIMEOUT_SECS_RANGE.start(),
                TIMEOUT_SECS_RANGE.end()
            )));
        }
        cfg.scan.timeout_secs = timeout;
    }

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Scan(args) => {
            crate::platform::install_interrupt_handler();
            let engine = Engine::new(
                EngineOptions {
                    timeout: Duration::from_secs(cfg.scan.timeout_secs),
                    protocols: cfg.scan.protocols.clone(),
                    show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
                },
                &cfg.classification_rules(),
            )?;
            let cancel = CancelToken::interruptible();
            let mut report = engine.run_scan(&cancel)?;

            let breach = args
                .fail_on
                .and_then(|threshold| threshold_breach(&report, threshold));

            let min_severity = args.min_severity.unwrap_or(cfg.scan.min_severity);
            apply_min_severity(&mut report, min_severity);

            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_markdown(&report)?;
            } else {
                crate::ui::print_scan(&report, &ui_cfg, args.top);
            }

            if let Some(message) = breach {
                return Err(crate::exit::findings_at_threshold(message));
            }
        }
        Commands::Rules => {
            let classifier = Classifier::new(&cfg.classification_rules())?;
            if cli.json {
                let rules: Vec<_> = classifier.rules().collect();
                write_json(&rules)?;
            } else {
                crate::ui::print_rules(&classifier, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "hostaudit", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `hostaudit config --show`");
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("HOSTAUDIT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Evaluated over the whole scan, before `--min-severity` hides anything.
fn threshold_breach(report: &ScanReport, threshold: Severity) -> Option<String> {
    let hits = report
        .findings
        .iter()
        .filter(|f| f.severity >= threshold)
        .count();
    (hits > 0).then(|| format!("{hits} findings at or above {threshold}"))
}

fn apply_min_severity(report: &mut ScanReport, min: Severity) {
    if min == Severity::Info {
        return;
    }
    let before = report.findings.len();
    report.findings.retain(|f| f.severity >= min);
    let hidden = before - report.findings.len();
    if hidden > 0 {
        report
            .summary
            .notes
            .push(format!("{hidden} findings below {min} are not listed"));
    }
}

fn write_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_markdown(report: &ScanReport) -> Result<()> {
    use std::io::Write;

    let markdown = format_markdown(report);
    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(markdown.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn format_markdown(report: &ScanReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let s = &report.summary;

    let _ = writeln!(out, "# hostaudit report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- tool version: {}", report.tool_version);
    let _ = writeln!(out, "- started: {}", report.started_at);
    let _ = writeln!(
        out,
        "- host: {} {} (kernel {}, platform {})",
        report.os.name, report.os.version, report.os.kernel, report.platform
    );
    let _ = writeln!(
        out,
        "- findings: {} (critical {}, high {}, medium {}, low {}, info {})",
        s.total_findings, s.critical, s.high, s.medium, s.low, s.info
    );
    let _ = writeln!(
        out,
        "- listeners by protocol: TCP {}, UDP {}",
        s.tcp, s.udp
    );
    for note in &s.notes {
        let _ = writeln!(out, "- note: {note}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Findings ({})", report.findings.len());
    if report.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_No findings._");
    }
    for f in &report.findings {
        let socket = f.socket();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "### {} {} ({})",
            socket.protocol,
            socket.endpoint(),
            f.severity
        );
        match f.process() {
            Some(p) => {
                let _ = writeln!(out, "- process: `{}` (pid {})", p.display_name(), p.pid);
                if let Some(user) = &p.user {
                    let _ = writeln!(out, "- user: {user}");
                }
            }
            None => {
                let owner = socket
                    .owner
                    .map(|pid| format!("pid {pid}, not resolved"))
                    .unwrap_or_else(|| "owner not visible".to_string());
                let _ = writeln!(out, "- process: unknown ({owner})");
            }
        }
        let c = &f.classified;
        let _ = writeln!(out, "- category: {} (confidence {})", c.category, c.confidence);
        if let Some(service) = &c.service {
            let _ = writeln!(out, "- service: {service}");
        }
        let _ = writeln!(out, "- rationale:");
        for code in &f.rationale {
            let _ = writeln!(out, "  - `{code}`");
        }
    }

    if !report.partial_failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "## Partial failures ({})",
            report.partial_failures.len()
        );
        let _ = writeln!(out);
        for failure in &report.partial_failures {
            let _ = writeln!(out, "- {failure}");
        }
    }

    let _ = writeln!(out);
    out
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        "powershell" => Ok(clap_complete::Shell::PowerShell),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish|powershell)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ClassifiedFinding, Confidence, CorrelatedFinding, OsInfo, ReportSummary, RiskAssessment,
        ServiceCategory, SocketEntry, SocketState, Protocol,
    };

    fn finding(port: u16, severity: Severity) -> RiskAssessment {
        RiskAssessment {
            classified: ClassifiedFinding {
                finding: CorrelatedFinding {
                    socket: SocketEntry {
                        protocol: Protocol::Tcp,
                        local_address: "0.0.0.0".parse().expect("addr"),
                        local_port: port,
                        state: SocketState::Listen,
                        owner: None,
                        handle: None,
                    },
                    process: None,
                },
                category: ServiceCategory::Unknown,
                confidence: Confidence::Low,
                service: None,
            },
            severity,
            rationale: vec!["unknown-process-listening".to_string()],
        }
    }

    fn report(findings: Vec<RiskAssessment>) -> ScanReport {
        ScanReport {
            schema_version: "1.0".to_string(),
            tool_version: "0.0.0".to_string(),
            platform: "linux".to_string(),
            os: OsInfo::unknown(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            duration_ms: 1,
            point_in_time: true,
            summary: ReportSummary::build(&findings, &[]),
            findings,
            partial_failures: Vec::new(),
        }
    }

    #[test]
    fn min_severity_hides_findings_but_keeps_counts() {
        let mut r = report(vec![
            finding(3306, Severity::Critical),
            finding(8080, Severity::Low),
        ]);
        apply_min_severity(&mut r, Severity::Medium);
        assert_eq!(r.findings.len(), 1);
        assert_eq!(r.summary.total_findings, 2);
        assert_eq!(r.summary.low, 1);
        assert!(r.summary.notes.iter().any(|n| n.contains("1 findings below Medium")));
    }

    #[test]
    fn threshold_breach_counts_at_or_above() {
        let r = report(vec![
            finding(3306, Severity::High),
            finding(8080, Severity::Low),
        ]);
        assert!(threshold_breach(&r, Severity::High).is_some());
        assert!(threshold_breach(&r, Severity::Critical).is_none());
    }

    #[test]
    fn markdown_lists_findings_and_unknown_owners() {
        let md = format_markdown(&report(vec![finding(8080, Severity::Medium)]));
        assert!(md.starts_with("# hostaudit report"));
        assert!(md.contains("### TCP 0.0.0.0:8080 (Medium)"));
        assert!(md.contains("- process: unknown (owner not visible)"));
        assert!(md.contains("- listeners by protocol: TCP 1, UDP 0"));
        assert!(md.contains("  - `unknown-process-listening`"));
        assert!(!md.contains("## Partial failures"));
    }

    #[test]
    fn markdown_reports_empty_scan() {
        let md = format_markdown(&report(Vec::new()));
        assert!(md.contains("## Findings (0)"));
        assert!(md.contains("_No findings._"));
    }

    #[test]
    fn parse_shell_rejects_unknown_shells() {
        assert!(parse_shell("Bash").is_ok());
        assert!(parse_shell("tcsh").is_err());
    }
}
