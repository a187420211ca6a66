use crate::core::{FailureScope, PartialFailure, Protocol, RiskAssessment, Severity};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_NOTE: &str =
    "point-in-time snapshot: sockets and processes were read moments apart; processes that exited in between show as unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub kernel: String,
}

impl OsInfo {
    pub fn unknown() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "unknown".to_string(),
            kernel: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_findings: usize,
    pub tcp: usize,
    pub udp: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub degraded: bool,
    pub unreadable_sources: usize,
    pub unreadable_records: usize,
    pub notes: Vec<String>,
}

impl ReportSummary {
    pub fn build(findings: &[RiskAssessment], failures: &[PartialFailure]) -> Self {
        let count = |sev: Severity| findings.iter().filter(|f| f.severity == sev).count();
        let on = |proto: Protocol| {
            findings
                .iter()
                .filter(|f| f.socket().protocol == proto)
                .count()
        };
        let unreadable_sources = failures
            .iter()
            .filter(|f| f.scope == FailureScope::Source)
            .count();
        let unreadable_records = failures
            .iter()
            .filter(|f| f.scope == FailureScope::Record)
            .count();
        let degraded = !failures.is_empty();

        let mut notes = vec![SNAPSHOT_NOTE.to_string()];
        if degraded {
            notes.push(format!(
                "scan degraded: {unreadable_sources} sources / {unreadable_records} records unreadable; results are a lower bound"
            ));
        }

        Self {
            total_findings: findings.len(),
            tcp: on(Protocol::Tcp),
            udp: on(Protocol::Udp),
            critical: count(Severity::Critical),
            high: count(Severity::High),
            medium: count(Severity::Medium),
            low: count(Severity::Low),
            info: count(Severity::Info),
            degraded,
            unreadable_sources,
            unreadable_records,
            notes,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub schema_version: String,
    pub tool_version: String,
    pub platform: String,
    pub os: OsInfo,
    pub started_at: String,
    pub duration_ms: u64,
    pub point_in_time: bool,
    pub summary: ReportSummary,
    pub findings: Vec<RiskAssessment>,
    pub partial_failures: Vec<PartialFailure>,
}
