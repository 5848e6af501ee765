//! Generate → audit → correct loop for one job.
//!
//! The controller is the only writer of a job record. Every transition is
//! persisted and emitted as a `job_transition` event before the next stage
//! starts, and a cancel marker is checked before each one.

use std::path::PathBuf;
use std::sync::Arc;

use brandgov_contracts::brand::{BrandGuidelines, CompressedDigitalTwin};
use brandgov_contracts::events::{EventWriter, TransitionRecord, JOB_TRANSITION_EVENT};
use brandgov_contracts::jobs::{ComplianceResult, GenerationJob, JobStatus};
use brandgov_contracts::store::{keys, load, save, ObjectStore};
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::AuditStage;
use crate::config::CorrectionPolicy;
use crate::error::StageError;
use crate::generation::{compose_prompt, GenerationStage};
use crate::map_object;
use crate::normalizer::{ImageNormalizer, Normalized};

pub const JOB_FAILED_EVENT: &str = "job_failed";

/// Next state after an audit.
///
/// A degraded audit never completes a job; at best it goes to review.
pub fn decide_outcome(
    policy: &CorrectionPolicy,
    result: &ComplianceResult,
    attempt_count: u32,
    max_attempts: u32,
) -> JobStatus {
    let score = result.overall_score;
    if score >= policy.accept_threshold && !result.degraded {
        return JobStatus::Completed;
    }
    if score >= policy.review_threshold {
        return JobStatus::NeedsReview;
    }
    if attempt_count < max_attempts {
        return JobStatus::Correcting;
    }
    JobStatus::Failed
}

/// Correction to feed the next generation: the most severe violation's fix,
/// or a sentence built from its category and description.
pub fn tweak_instruction(result: &ComplianceResult) -> Option<String> {
    let violation = result.most_severe_violation()?;
    if let Some(fix) = violation
        .fix_suggestion
        .as_deref()
        .map(str::trim)
        .filter(|fix| !fix.is_empty())
    {
        return Some(fix.to_string());
    }
    Some(format!(
        "Resolve the {} issue: {}",
        violation.category,
        violation.description.trim()
    ))
}

pub struct CorrectionController {
    store: Arc<dyn ObjectStore>,
    generation: GenerationStage,
    audit: AuditStage,
    normalizer: Arc<dyn ImageNormalizer>,
    policy: CorrectionPolicy,
    events: EventWriter,
    logos_dir: PathBuf,
}

impl CorrectionController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        generation: GenerationStage,
        audit: AuditStage,
        normalizer: Arc<dyn ImageNormalizer>,
        policy: CorrectionPolicy,
        events: EventWriter,
        logos_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            generation,
            audit,
            normalizer,
            policy,
            events,
            logos_dir: logos_dir.into(),
        }
    }

    /// Drives `job` to a terminal state and returns it. Stage errors end the
    /// job as `failed` with the error recorded; nothing is returned as `Err`.
    pub async fn run(&self, mut job: GenerationJob) -> GenerationJob {
        match self.drive(&mut job).await {
            Ok(()) => {}
            Err(StageError::Cancelled) => {
                info!(job_id = %job.job_id, attempt_count = job.attempt_count, "job cancelled");
            }
            Err(err) => self.fail(&mut job, &err),
        }
        if let Err(err) = self.store.delete(&keys::job_cancel(&job.job_id)) {
            warn!(job_id = %job.job_id, error = %err, "failed to clear cancel marker");
        }
        job
    }

    async fn drive(&self, job: &mut GenerationJob) -> Result<(), StageError> {
        self.advance(job, JobStatus::Processing)?;

        let guidelines: BrandGuidelines = load(self.store.as_ref(), &keys::guidelines(&job.brand_id))?
            .ok_or_else(|| StageError::MissingGuidelines(job.brand_id.clone()))?;
        let twin: CompressedDigitalTwin = load(self.store.as_ref(), &keys::twin(&job.brand_id))?
            .ok_or_else(|| StageError::MissingTwin(job.brand_id.clone()))?;
        let references = self.normalize_logos(job).await;

        let mut tweak: Option<String> = None;
        loop {
            self.advance(job, JobStatus::Generating)?;
            let prompt = compose_prompt(&job.prompt, tweak.as_deref());
            let image_ref = self
                .generation
                .generate(&job.job_id, job.attempt_count, &prompt, &twin, &references)
                .await?;
            job.image_ref = Some(image_ref.clone());

            self.advance(job, JobStatus::Auditing)?;
            let result = self
                .audit
                .audit(&image_ref, &guidelines, job.compliance_score)
                .await;
            let next = decide_outcome(&self.policy, &result, job.attempt_count, job.max_attempts);
            let score = result.overall_score;
            // A degraded audit says nothing about the image; keep steering
            // with the last real finding.
            if !result.degraded {
                tweak = tweak_instruction(&result);
            }
            job.record_audit(result);

            match next {
                JobStatus::Correcting => {
                    info!(
                        job_id = %job.job_id,
                        attempt_count = job.attempt_count,
                        score,
                        tweak = tweak.as_deref().unwrap_or_default(),
                        "audit below review threshold; correcting"
                    );
                    self.advance(job, JobStatus::Correcting)?;
                }
                JobStatus::Failed => {
                    job.error = Some(format!(
                        "correction attempts exhausted after {} attempt(s); last score {score} below review threshold {}",
                        job.attempt_count, self.policy.review_threshold
                    ));
                    self.advance(job, JobStatus::Failed)?;
                    self.emit_failure(job);
                    return Ok(());
                }
                terminal => {
                    self.advance(job, terminal)?;
                    return Ok(());
                }
            }
        }
    }

    /// Logos are normalized one at a time; degraded ones are skipped.
    async fn normalize_logos(&self, job: &GenerationJob) -> Vec<PathBuf> {
        let out_dir = self.logos_dir.join(&job.job_id);
        let mut references = Vec::new();
        for source in &job.logos {
            let normalizer = Arc::clone(&self.normalizer);
            let source_path = source.clone();
            let target_dir = out_dir.clone();
            let normalized = tokio::task::spawn_blocking(move || {
                normalizer.normalize(&source_path, &target_dir)
            })
            .await
            .unwrap_or_else(|err| Normalized::Degraded {
                source: source.clone(),
                reason: format!("normalizer task failed: {err}"),
            });
            match normalized {
                Normalized::Ready { path, .. } => references.push(path),
                Normalized::Degraded { source, reason } => warn!(
                    job_id = %job.job_id,
                    logo = %source.display(),
                    reason = %reason,
                    "skipping logo reference"
                ),
            }
        }
        references
    }

    /// Applies `next`, unless a cancel marker is present, in which case the
    /// job moves to `cancelled` instead.
    fn advance(&self, job: &mut GenerationJob, next: JobStatus) -> Result<(), StageError> {
        if self.cancel_requested(&job.job_id)? {
            self.apply(job, JobStatus::Cancelled)?;
            return Err(StageError::Cancelled);
        }
        self.apply(job, next)
    }

    fn apply(&self, job: &mut GenerationJob, next: JobStatus) -> Result<(), StageError> {
        let from = job.transition(next)?;
        save(self.store.as_ref(), &keys::job(&job.job_id), job)?;
        info!(
            job_id = %job.job_id,
            from = from.as_str(),
            to = next.as_str(),
            attempt_count = job.attempt_count,
            "job transition"
        );
        self.events.record_quietly(
            JOB_TRANSITION_EVENT,
            &TransitionRecord {
                job_id: job.job_id.clone(),
                brand_id: job.brand_id.clone(),
                from: from.as_str().to_string(),
                to: next.as_str().to_string(),
                attempt_count: job.attempt_count,
            },
        );
        Ok(())
    }

    fn cancel_requested(&self, job_id: &str) -> Result<bool, StageError> {
        Ok(self.store.get(&keys::job_cancel(job_id))?.is_some())
    }

    fn fail(&self, job: &mut GenerationJob, err: &StageError) {
        error!(job_id = %job.job_id, error = %err, "job failed");
        if job.status.is_terminal() {
            return;
        }
        job.error = Some(err.to_string());
        if let Err(transition_err) = self.apply(job, JobStatus::Failed) {
            error!(
                job_id = %job.job_id,
                error = %transition_err,
                "failed to persist failed state"
            );
            return;
        }
        self.emit_failure(job);
    }

    fn emit_failure(&self, job: &GenerationJob) {
        self.events.record_quietly(
            JOB_FAILED_EVENT,
            &map_object(json!({
                "job_id": job.job_id,
                "brand_id": job.brand_id,
                "attempt_count": job.attempt_count,
                "compliance_score": job.compliance_score,
                "error": job.error,
            })),
        );
    }
}
