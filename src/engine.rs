use std::cmp::Reverse;
use std::thread;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::core::{
    FailureKind, FailureSource, Protocol, ReportSummary, RiskAssessment, ScanReport,
};
use crate::correlate::{correlate, owner_visibility_failure};
use crate::error::{AbortReason, ScanError};
use crate::platform::{self, CancelToken, ReadContext, SourceRead, SystemTables};
use crate::rules::{self, ClassificationRule, Classifier};

pub const SCHEMA_VERSION: &str = "1.0";
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);
const OS_INFO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Budget for both table reads together.
    pub timeout: Duration,
    pub protocols: Vec<Protocol>,
    pub show_progress: bool,
}

impl EngineOptions {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.timeout.is_zero() || self.timeout > MAX_TIMEOUT {
            return Err(ScanError::Configuration(format!(
                "timeout must be between 1ms and {}s (got {:?})",
                MAX_TIMEOUT.as_secs(),
                self.timeout
            )));
        }
        if self.protocols.is_empty() {
            return Err(ScanError::Configuration(
                "at least one protocol must be selected".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Engine {
    opts: EngineOptions,
    tables: Box<dyn SystemTables>,
    classifier: Classifier,
}

impl Engine {
    /// Engine for the host platform. Fails before reading anything when the
    /// platform is unsupported or the options are invalid.
    pub fn new(opts: EngineOptions, extra_rules: &[ClassificationRule]) -> Result<Self, ScanError> {
        Self::with_tables(opts, extra_rules, platform::detect_current()?)
    }

    pub fn with_tables(
        opts: EngineOptions,
        extra_rules: &[ClassificationRule],
        tables: Box<dyn SystemTables>,
    ) -> Result<Self, ScanError> {
        opts.validate()?;
        let classifier = Classifier::new(extra_rules)?;
        Ok(Self {
            opts,
            tables,
            classifier,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn platform(&self) -> &'static str {
        self.tables.name()
    }

    /// Take one snapshot of the socket and process tables and turn it into
    /// an ordered report.
    ///
    /// Degraded reads are recorded in `partial_failures`; the scan is only
    /// aborted when both tables are unreadable or `cancel` fires before the
    /// reads complete.
    pub fn run_scan(&self, cancel: &CancelToken) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        if cancel.is_cancelled() {
            return Err(ScanError::aborted(AbortReason::Cancelled, Vec::new()));
        }

        let ctx = ReadContext::new(self.opts.timeout, self.opts.protocols.clone(), cancel.clone());
        let pb = self.spinner();
        let tables = self.tables.as_ref();
        let (sockets, processes) = thread::scope(|s| {
            let sockets = s.spawn(|| tables.read_sockets(&ctx));
            let processes = s.spawn(|| tables.read_processes(&ctx));
            (
                settle(sockets.join(), FailureSource::Sockets),
                settle(processes.join(), FailureSource::Processes),
            )
        });
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        debug!(
            sockets = sockets.entries.len(),
            processes = processes.entries.len(),
            socket_failures = sockets.failures.len(),
            process_failures = processes.failures.len(),
            "tables read"
        );

        let both_failed = sockets.failed && processes.failed;
        let mut failures = sockets.failures;
        failures.extend(processes.failures);

        if cancel.is_cancelled() {
            warn!("scan cancelled");
            return Err(ScanError::aborted(AbortReason::Cancelled, failures));
        }
        if both_failed {
            warn!(failures = failures.len(), "socket and process tables both unreadable");
            return Err(ScanError::aborted(AbortReason::BothReadersFailed, failures));
        }

        let correlated = correlate(&sockets.entries, &processes.entries);
        failures.extend(owner_visibility_failure(&sockets.entries));

        let mut findings: Vec<RiskAssessment> = correlated
            .into_iter()
            .map(|finding| rules::score(self.classifier.classify(finding)))
            .collect();
        findings.sort_by_key(|f| {
            let s = f.socket();
            (
                Reverse(f.severity),
                s.local_port,
                s.protocol,
                s.local_address,
                s.owner,
            )
        });

        let os_ctx = ReadContext::new(
            self.opts.timeout.min(OS_INFO_TIMEOUT),
            self.opts.protocols.clone(),
            cancel.clone(),
        );
        let os = self.tables.os_info(&os_ctx);
        let summary = ReportSummary::build(&findings, &failures);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            findings = findings.len(),
            failures = failures.len(),
            duration_ms,
            "scan complete"
        );

        Ok(ScanReport {
            schema_version: SCHEMA_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: self.tables.name().to_string(),
            os,
            started_at,
            duration_ms,
            point_in_time: true,
            summary,
            findings,
            partial_failures: failures,
        })
    }

    fn spinner(&self) -> Option<indicatif::ProgressBar> {
        use std::io::IsTerminal;
        if !self.opts.show_progress || !std::io::stderr().is_terminal() {
            return None;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message("reading socket and process tables...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }
}

/// A reader that panicked counts as a failed source.
fn settle<T>(joined: thread::Result<SourceRead<T>>, source: FailureSource) -> SourceRead<T> {
    joined.unwrap_or_else(|_| {
        warn!(source = source.as_str(), "table reader panicked");
        SourceRead::failure(source, FailureKind::Internal, "reader panicked")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(timeout: Duration, protocols: Vec<Protocol>) -> EngineOptions {
        EngineOptions {
            timeout,
            protocols,
            show_progress: false,
        }
    }

    #[test]
    fn options_reject_zero_and_excessive_timeouts() {
        assert!(opts(Duration::ZERO, vec![Protocol::Tcp]).validate().is_err());
        assert!(opts(Duration::from_secs(61), vec![Protocol::Tcp]).validate().is_err());
        assert!(opts(Duration::from_secs(5), vec![Protocol::Tcp]).validate().is_ok());
    }

    #[test]
    fn options_require_a_protocol() {
        let err = opts(Duration::from_secs(5), Vec::new())
            .validate()
            .expect_err("empty protocols");
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn panicking_reader_becomes_an_internal_failure() {
        let joined: thread::Result<SourceRead<u8>> = Err(Box::new("boom"));
        let read = settle(joined, FailureSource::Processes);
        assert!(read.failed);
        assert_eq!(read.failures[0].kind, FailureKind::Internal);
    }
}
