mod failure;
mod finding;
mod process;
mod report;
mod risk;
mod socket;

pub use failure::{FailureKind, FailureScope, FailureSource, PartialFailure};
pub use finding::{ClassifiedFinding, Confidence, CorrelatedFinding, RiskAssessment, ServiceCategory};
pub use process::ProcessEntry;
pub(crate) use process::file_name;
pub use report::{OsInfo, ReportSummary, ScanReport};
pub use risk::Severity;
pub use socket::{Exposure, Protocol, SocketEntry, SocketState};
