use std::fmt;

use thiserror::Error;

use crate::core::PartialFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Neither the socket table nor the process table produced anything.
    BothReadersFailed,
    /// Cancellation was requested while the scan was running.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::BothReadersFailed => f.write_str("socket and process tables both unreadable"),
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// Rejected before any read started.
    #[error("invalid scan configuration: {0}")]
    Configuration(String),

    #[error("scan aborted: {reason} ({} failures)", .failures.len())]
    Aborted {
        reason: AbortReason,
        failures: Vec<PartialFailure>,
    },
}

impl ScanError {
    pub fn aborted(reason: AbortReason, failures: Vec<PartialFailure>) -> Self {
        ScanError::Aborted { reason, failures }
    }

    pub fn failures(&self) -> &[PartialFailure] {
        match self {
            ScanError::Configuration(_) => &[],
            ScanError::Aborted { failures, .. } => failures,
        }
    }
}
