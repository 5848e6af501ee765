mod compliance;
mod job;
mod status;

pub use compliance::{ComplianceResult, Severity, Violation, SYSTEM_CATEGORY};
pub use job::{GenerationJob, GenerationRequest, JobStatusView, JobTicket, TransitionError};
pub use status::JobStatus;
