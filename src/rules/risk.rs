use std::fmt;

use crate::core::{
    ClassifiedFinding, Confidence, Exposure, Protocol, RiskAssessment, ServiceCategory, Severity,
};

use Predicate::{
    All, Any, Category, Confidence as Conf, Exposure as Exp, NotLoopback, PortIn, Protocol as Proto,
};

/// Rationale attached when no rule fires.
pub const NO_MATCHING_RULE: &str = "no-matching-rule";

/// A condition over one classified finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Category(ServiceCategory),
    Confidence(Confidence),
    Exposure(Exposure),
    NotLoopback,
    PortIn(&'static [u16]),
    PortRange(u16, u16),
    Protocol(Protocol),
    UnknownProcess,
    All(&'static [Predicate]),
    Any(&'static [Predicate]),
}

impl Predicate {
    pub fn matches(&self, f: &ClassifiedFinding) -> bool {
        let socket = &f.finding.socket;
        match *self {
            Predicate::Category(category) => f.category == category,
            Predicate::Confidence(confidence) => f.confidence == confidence,
            Predicate::Exposure(exposure) => socket.exposure() == exposure,
            Predicate::NotLoopback => socket.exposure() != Exposure::Loopback,
            Predicate::PortIn(ports) => ports.contains(&socket.local_port),
            Predicate::PortRange(lo, hi) => (lo..=hi).contains(&socket.local_port),
            Predicate::Protocol(protocol) => socket.protocol == protocol,
            Predicate::UnknownProcess => f.finding.process.is_none(),
            Predicate::All(all) => all.iter().all(|p| p.matches(f)),
            Predicate::Any(any) => any.iter().any(|p| p.matches(f)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Category(category) => write!(f, "category = {category}"),
            Predicate::Confidence(confidence) => write!(f, "confidence = {confidence}"),
            Predicate::Exposure(exposure) => write!(f, "{}", exposure.as_str()),
            Predicate::NotLoopback => f.write_str("not loopback"),
            Predicate::PortIn(ports) => {
                let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
                write!(f, "port in {{{}}}", ports.join(", "))
            }
            Predicate::PortRange(lo, hi) => write!(f, "port in {lo}..={hi}"),
            Predicate::Protocol(protocol) => write!(f, "protocol = {protocol}"),
            Predicate::UnknownProcess => f.write_str("process unknown"),
            Predicate::All(all) => join(f, all, " and "),
            Predicate::Any(any) => join(f, any, " or "),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match part {
            Predicate::All(_) | Predicate::Any(_) => write!(f, "({part})")?,
            _ => write!(f, "{part}")?,
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskRule {
    pub code: &'static str,
    pub severity: Severity,
    pub when: Predicate,
}

/// The risk table, in rationale order.
pub const RISK_RULES: &[RiskRule] = &[
    RiskRule {
        code: "database-exposed-externally",
        severity: Severity::Critical,
        when: All(&[Category(ServiceCategory::Database), NotLoopback]),
    },
    RiskRule {
        code: "unauthenticated-default-port",
        severity: Severity::Critical,
        when: All(&[PortIn(&[6379, 11211, 27017, 9200, 5984]), NotLoopback]),
    },
    RiskRule {
        code: "file-sharing-exposed-externally",
        severity: Severity::High,
        when: All(&[Category(ServiceCategory::FileSharing), NotLoopback]),
    },
    RiskRule {
        code: "cleartext-authentication",
        severity: Severity::High,
        when: All(&[
            Any(&[
                All(&[PortIn(&[21, 23, 110, 143]), Proto(Protocol::Tcp)]),
                All(&[PortIn(&[69]), Proto(Protocol::Udp)]),
            ]),
            NotLoopback,
        ]),
    },
    RiskRule {
        code: "remote-desktop-exposed",
        severity: Severity::High,
        when: All(&[
            Any(&[PortIn(&[3389]), Predicate::PortRange(5900, 5903)]),
            NotLoopback,
        ]),
    },
    RiskRule {
        code: "remote-access-exposed",
        severity: Severity::Medium,
        when: All(&[Category(ServiceCategory::RemoteAccess), NotLoopback]),
    },
    RiskRule {
        code: "database-loopback-only",
        severity: Severity::Low,
        when: All(&[Category(ServiceCategory::Database), Exp(Exposure::Loopback)]),
    },
    RiskRule {
        code: "exposed-to-all-interfaces",
        severity: Severity::Low,
        when: Exp(Exposure::AllInterfaces),
    },
    RiskRule {
        code: "web-server-exposed",
        severity: Severity::Low,
        when: All(&[Category(ServiceCategory::WebServer), NotLoopback]),
    },
    RiskRule {
        code: "unresolved-process-owner",
        severity: Severity::Low,
        when: All(&[Predicate::UnknownProcess, NotLoopback]),
    },
    RiskRule {
        code: "unidentified-listener",
        severity: Severity::Info,
        when: All(&[Category(ServiceCategory::Unknown), Conf(Confidence::Low)]),
    },
    RiskRule {
        code: "system-service",
        severity: Severity::Info,
        when: Category(ServiceCategory::SystemService),
    },
];

/// Score against the built-in table.
pub fn score(finding: ClassifiedFinding) -> RiskAssessment {
    score_with(RISK_RULES, finding)
}

/// Every matching rule contributes its code, in table order; severity is the
/// highest among them. With no match the finding is `Info` /
/// `no-matching-rule`.
pub fn score_with(rules: &[RiskRule], finding: ClassifiedFinding) -> RiskAssessment {
    let fired: Vec<&RiskRule> = rules.iter().filter(|r| r.when.matches(&finding)).collect();
    let severity = fired
        .iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or(Severity::Info);
    let mut rationale: Vec<String> = fired.iter().map(|r| r.code.to_string()).collect();
    if rationale.is_empty() {
        rationale.push(NO_MATCHING_RULE.to_string());
    }
    RiskAssessment {
        classified: finding,
        severity,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CorrelatedFinding, ProcessEntry, SocketEntry, SocketState};

    fn classified(
        addr: &str,
        port: u16,
        category: ServiceCategory,
        confidence: Confidence,
        with_process: bool,
    ) -> ClassifiedFinding {
        ClassifiedFinding {
            finding: CorrelatedFinding {
                socket: SocketEntry {
                    protocol: Protocol::Tcp,
                    local_address: addr.parse().expect("ip"),
                    local_port: port,
                    state: SocketState::Listen,
                    owner: Some(42),
                    handle: None,
                },
                process: with_process.then(|| ProcessEntry::bare(42)),
            },
            category,
            confidence,
            service: None,
        }
    }

    #[test]
    fn exposed_database_is_critical_with_all_codes_in_order() {
        let out = score(classified(
            "0.0.0.0",
            3306,
            ServiceCategory::Database,
            Confidence::High,
            true,
        ));
        assert_eq!(out.severity, Severity::Critical);
        assert_eq!(
            out.rationale,
            vec!["database-exposed-externally", "exposed-to-all-interfaces"]
        );
    }

    #[test]
    fn loopback_database_is_low_and_not_exposed() {
        let out = score(classified(
            "127.0.0.1",
            6379,
            ServiceCategory::Database,
            Confidence::High,
            true,
        ));
        assert_eq!(out.severity, Severity::Low);
        assert_eq!(out.rationale, vec!["database-loopback-only"]);
        assert!(!out.rationale.iter().any(|r| r.contains("exposed-externally")));
    }

    #[test]
    fn remote_desktop_on_interface_address() {
        let out = score(classified(
            "192.168.1.10",
            5901,
            ServiceCategory::RemoteAccess,
            Confidence::Medium,
            true,
        ));
        assert_eq!(out.severity, Severity::High);
        assert_eq!(
            out.rationale,
            vec!["remote-desktop-exposed", "remote-access-exposed"]
        );
    }

    #[test]
    fn unknown_low_confidence_listener_is_info() {
        let out = score(classified(
            "127.0.0.1",
            40000,
            ServiceCategory::Unknown,
            Confidence::Low,
            true,
        ));
        assert_eq!(out.severity, Severity::Info);
        assert_eq!(out.rationale, vec!["unidentified-listener"]);
    }

    #[test]
    fn unresolved_owner_raises_exposed_unknown_listener() {
        let out = score(classified(
            "::",
            40000,
            ServiceCategory::Unknown,
            Confidence::Low,
            false,
        ));
        assert_eq!(out.severity, Severity::Low);
        assert_eq!(
            out.rationale,
            vec![
                "exposed-to-all-interfaces",
                "unresolved-process-owner",
                "unidentified-listener"
            ]
        );
    }

    #[test]
    fn nothing_fired_falls_back_to_info() {
        let out = score(classified(
            "127.0.0.1",
            8080,
            ServiceCategory::WebServer,
            Confidence::Medium,
            true,
        ));
        assert_eq!(out.severity, Severity::Info);
        assert_eq!(out.rationale, vec![NO_MATCHING_RULE]);

        let input = classified(
            "0.0.0.0",
            22,
            ServiceCategory::RemoteAccess,
            Confidence::High,
            true,
        );
        let out = score_with(&[], input);
        assert_eq!(out.severity, Severity::Info);
        assert_eq!(out.rationale, vec![NO_MATCHING_RULE]);
    }

    #[test]
    fn scoring_is_deterministic() {
        let input = classified(
            "0.0.0.0",
            445,
            ServiceCategory::FileSharing,
            Confidence::High,
            false,
        );
        assert_eq!(score(input.clone()), score(input));
    }

    #[test]
    fn cleartext_ports_are_matched_per_protocol() {
        let mut tftp = classified(
            "0.0.0.0",
            69,
            ServiceCategory::FileSharing,
            Confidence::Medium,
            true,
        );
        assert!(!score(tftp.clone()).rationale.iter().any(|r| r == "cleartext-authentication"));

        tftp.finding.socket.protocol = Protocol::Udp;
        tftp.finding.socket.state = SocketState::Bound;
        let out = score(tftp);
        assert_eq!(out.severity, Severity::High);
        assert!(out.rationale.iter().any(|r| r == "cleartext-authentication"));

        let telnet = score(classified(
            "10.0.0.2",
            23,
            ServiceCategory::RemoteAccess,
            Confidence::Medium,
            true,
        ));
        assert_eq!(telnet.rationale[0], "cleartext-authentication");
    }

    #[test]
    fn predicates_render_readably() {
        let rule = RISK_RULES
            .iter()
            .find(|r| r.code == "remote-desktop-exposed")
            .expect("rule");
        assert_eq!(
            rule.when.to_string(),
            "(port in {3389} or port in 5900..=5903) and not loopback"
        );

        let rule = RISK_RULES
            .iter()
            .find(|r| r.code == "cleartext-authentication")
            .expect("rule");
        assert_eq!(
            rule.when.to_string(),
            "((port in {21, 23, 110, 143} and protocol = TCP) or (port in {69} and protocol = UDP)) and not loopback"
        );
    }
}
