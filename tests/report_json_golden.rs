use hostaudit::core::{
    ClassifiedFinding, Confidence, CorrelatedFinding, FailureKind, FailureSource, OsInfo,
    PartialFailure, ProcessEntry, Protocol, ReportSummary, RiskAssessment, ScanReport,
    ServiceCategory, Severity, SocketEntry, SocketState,
};

fn assessment(
    socket: SocketEntry,
    process: Option<ProcessEntry>,
    category: ServiceCategory,
    confidence: Confidence,
    service: Option<&str>,
    severity: Severity,
    rationale: &[&str],
) -> RiskAssessment {
    RiskAssessment {
        classified: ClassifiedFinding {
            finding: CorrelatedFinding { socket, process },
            category,
            confidence,
            service: service.map(str::to_string),
        },
        severity,
        rationale: rationale.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[test]
fn report_json_matches_golden() {
    let findings = vec![
        assessment(
            SocketEntry {
                protocol: Protocol::Tcp,
                local_address: "0.0.0.0".parse().expect("addr"),
                local_port: 3306,
                state: SocketState::Listen,
                owner: Some(812),
                handle: Some(4242),
            },
            Some(ProcessEntry {
                pid: 812,
                name: Some("mysqld".to_string()),
                executable_path: Some("/usr/sbin/mysqld".to_string()),
                command_line: Some(vec![
                    "/usr/sbin/mysqld".to_string(),
                    "--user=mysql".to_string(),
                ]),
                user: Some("mysql".to_string()),
            }),
            ServiceCategory::Database,
            Confidence::High,
            Some("MySQL"),
            Severity::Critical,
            &["database-exposed-externally", "exposed-to-all-interfaces"],
        ),
        assessment(
            SocketEntry {
                protocol: Protocol::Udp,
                local_address: "::1".parse().expect("addr"),
                local_port: 41000,
                state: SocketState::Bound,
                owner: None,
                handle: None,
            },
            None,
            ServiceCategory::Unknown,
            Confidence::Low,
            None,
            Severity::Info,
            &["unidentified-listener"],
        ),
    ];
    let partial_failures = vec![PartialFailure::record(
        FailureSource::Processes,
        "pid 4",
        FailureKind::PermissionDenied,
        "executable path: permission denied",
    )];

    let report = ScanReport {
        schema_version: "1.0".to_string(),
        tool_version: "0.1.0".to_string(),
        platform: "linux".to_string(),
        os: OsInfo {
            name: "Debian GNU/Linux".to_string(),
            version: "12".to_string(),
            kernel: "6.1.0-18-amd64".to_string(),
        },
        started_at: "2026-01-01T00:00:00Z".to_string(),
        duration_ms: 42,
        point_in_time: true,
        summary: ReportSummary::build(&findings, &partial_failures),
        findings,
        partial_failures,
    };

    let actual = serde_json::to_value(&report).expect("serialize report");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/report.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}

#[test]
fn report_json_round_trips() {
    let golden = include_str!("golden/report.json");
    let report: ScanReport = serde_json::from_str(golden).expect("deserialize golden");
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].socket().owner, Some(812));
    assert!(report.findings[1].process().is_none());
    assert_eq!(report.summary.count(Severity::Critical), 1);
}
