use std::fmt;

use crate::error::{AbortReason, ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// Findings at or above `--fail-on`.
    FindingsAtThreshold,
    InvalidArgs,
    ScanAborted,
    Interrupted,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::FindingsAtThreshold => 1,
            ExitCode::InvalidArgs => 2,
            ExitCode::ScanAborted => 10,
            ExitCode::Interrupted => 130,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    if let Some(scan) = err.downcast_ref::<ScanError>() {
        return scan_error_code(scan).as_i32();
    }
    ExitCode::ScanAborted.as_i32()
}

fn scan_error_code(err: &ScanError) -> ExitCode {
    match err {
        ScanError::Configuration(_) => ExitCode::InvalidArgs,
        ScanError::Aborted {
            reason: AbortReason::Cancelled,
            ..
        } if crate::platform::interrupted() => ExitCode::Interrupted,
        ScanError::Aborted { .. } => ExitCode::ScanAborted,
    }
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn findings_at_threshold(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(
        ExitCode::FindingsAtThreshold,
        anyhow::anyhow!(message.into()),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_errors_map_to_documented_codes() {
        let config: anyhow::Error = ScanError::Configuration("bad".to_string()).into();
        assert_eq!(exit_code(&config), 2);

        let aborted: anyhow::Error =
            ScanError::aborted(AbortReason::BothReadersFailed, Vec::new()).into();
        assert_eq!(exit_code(&aborted), 10);

        let wrapped = aborted.context("scan");
        assert_eq!(exit_code(&wrapped), 10);
    }

    #[test]
    fn exit_errors_keep_their_code() {
        assert_eq!(exit_code(&invalid_args("nope")), 2);
        assert_eq!(exit_code(&findings_at_threshold("found")), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 10);
    }
}
