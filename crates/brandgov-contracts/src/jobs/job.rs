use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ComplianceResult, JobStatus, Violation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub brand_id: String,
    pub prompt: String,
    /// Logo files to normalize and pass along as reference images.
    #[serde(default)]
    pub logos: Vec<PathBuf>,
}

impl GenerationRequest {
    pub fn new(brand_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            brand_id: brand_id.into(),
            prompt: prompt.into(),
            logos: Vec::new(),
        }
    }
}

/// Immediate answer to a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
    pub status: JobStatus,
}

/// Read model handed to status pollers and monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub image_ref: Option<String>,
    pub compliance_score: Option<f64>,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    Illegal {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {job_id}: attempt limit {max_attempts} reached")]
    AttemptsExhausted { job_id: String, max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub brand_id: String,
    pub prompt: String,
    #[serde(default)]
    pub logos: Vec<PathBuf>,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub image_ref: Option<String>,
    pub compliance_score: Option<f64>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Every audit in order; the last one is authoritative.
    #[serde(default)]
    pub audits: Vec<ComplianceResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(request: GenerationRequest, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            brand_id: request.brand_id,
            prompt: request.prompt,
            logos: request.logos,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts,
            image_ref: None,
            compliance_score: None,
            violations: Vec::new(),
            audits: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ticket(&self) -> JobTicket {
        JobTicket {
            job_id: self.job_id.clone(),
            status: self.status,
        }
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status,
            attempt_count: self.attempt_count,
            image_ref: self.image_ref.clone(),
            compliance_score: self.compliance_score,
            violations: self.violations.clone(),
        }
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn latest_audit(&self) -> Option<&ComplianceResult> {
        self.audits.last()
    }

    /// Applies one edge of the state machine. Entering `Processing` resets
    /// the attempt counter; every entry into `Generating` consumes one attempt.
    pub fn transition(&mut self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                job_id: self.job_id.clone(),
                from,
                to: next,
            });
        }
        match next {
            JobStatus::Processing => self.attempt_count = 0,
            JobStatus::Generating => {
                if !self.attempts_remaining() {
                    return Err(TransitionError::AttemptsExhausted {
                        job_id: self.job_id.clone(),
                        max_attempts: self.max_attempts,
                    });
                }
                self.attempt_count += 1;
            }
            _ => {}
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(from)
    }

    pub fn record_audit(&mut self, result: ComplianceResult) {
        self.compliance_score = Some(result.overall_score);
        self.violations = result.violations.clone();
        self.audits.push(result);
        self.updated_at = Utc::now();
    }
}
