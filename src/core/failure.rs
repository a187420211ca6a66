use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSource {
    Sockets,
    Processes,
    Correlation,
}

impl FailureSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureSource::Sockets => "sockets",
            FailureSource::Processes => "processes",
            FailureSource::Correlation => "correlation",
        }
    }
}

/// Whether a whole data source (a table, a protocol family) or a single
/// record within it could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    Source,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    PermissionDenied,
    Unavailable,
    Timeout,
    Cancelled,
    CommandFailed,
    ParseError,
    Internal,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::PermissionDenied => "PermissionDenied",
            FailureKind::Unavailable => "Unavailable",
            FailureKind::Timeout => "Timeout",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::CommandFailed => "CommandFailed",
            FailureKind::ParseError => "ParseError",
            FailureKind::Internal => "Internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub source: FailureSource,
    pub scope: FailureScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub kind: FailureKind,
    pub detail: String,
}

impl PartialFailure {
    pub fn source(source: FailureSource, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            source,
            scope: FailureScope::Source,
            record_id: None,
            kind,
            detail: detail.into(),
        }
    }

    pub fn record(
        source: FailureSource,
        record_id: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source,
            scope: FailureScope::Record,
            record_id: Some(record_id.into()),
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(
                f,
                "{} [{}] {}: {}",
                self.source.as_str(),
                id,
                self.kind.as_str(),
                self.detail
            ),
            None => write!(
                f,
                "{}: {}: {}",
                self.source.as_str(),
                self.kind.as_str(),
                self.detail
            ),
        }
    }
}
