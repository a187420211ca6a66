use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{ProcessEntry, Severity, SocketEntry};

/// One socket joined with the process that owns it, if it could be found.
/// `process` is `None` when the owner is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedFinding {
    #[serde(flatten)]
    pub socket: SocketEntry,
    pub process: Option<ProcessEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCategory {
    Database,
    FileSharing,
    WebServer,
    RemoteAccess,
    SystemService,
    Unknown,
}

impl ServiceCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ServiceCategory::Database => "Database",
            ServiceCategory::FileSharing => "FileSharing",
            ServiceCategory::WebServer => "WebServer",
            ServiceCategory::RemoteAccess => "RemoteAccess",
            ServiceCategory::SystemService => "SystemService",
            ServiceCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High: matched by process identity. Medium: matched by well-known port
/// only. Low: nothing matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFinding {
    #[serde(flatten)]
    pub finding: CorrelatedFinding,
    pub category: ServiceCategory,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(flatten)]
    pub classified: ClassifiedFinding,
    pub severity: Severity,
    pub rationale: Vec<String>,
}

impl RiskAssessment {
    pub fn socket(&self) -> &SocketEntry {
        &self.classified.finding.socket
    }

    pub fn process(&self) -> Option<&ProcessEntry> {
        self.classified.finding.process.as_ref()
    }
}
