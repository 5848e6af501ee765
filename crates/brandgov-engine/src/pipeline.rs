use std::path::Path;
use std::sync::Arc;

use brandgov_contracts::brand::{CompressedDigitalTwin, RawGuideline};
use brandgov_contracts::events::EventWriter;
use brandgov_contracts::jobs::{GenerationJob, GenerationRequest, JobStatusView, JobTicket};
use brandgov_contracts::store::{keys, load, save, ObjectStore};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use crate::audit::AuditStage;
use crate::compressor::Compressor;
use crate::config::PipelineConfig;
use crate::controller::CorrectionController;
use crate::error::{ConfigurationError, PipelineError};
use crate::generation::GenerationStage;
use crate::ingest::{ingest, IngestionReport};
use crate::normalizer::RasterNormalizer;
use crate::router::ModelRouter;

/// Entry point for callers: ingestion, job submission, status and cancel.
pub struct BrandPipeline {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
    events: EventWriter,
    compressor: Compressor,
    controller: Arc<CorrectionController>,
}

/// A running job. Dropping it detaches the task; the job still finishes.
pub struct SubmittedJob {
    pub ticket: JobTicket,
    handle: JoinHandle<GenerationJob>,
}

impl SubmittedJob {
    pub async fn wait(self) -> Result<GenerationJob, PipelineError> {
        self.handle
            .await
            .map_err(|err| PipelineError::Join(err.to_string()))
    }
}

impl BrandPipeline {
    /// Builds the router from `config`; fails on missing credentials or
    /// unusable model ids before any job can be accepted.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        work_dir: &Path,
    ) -> Result<Self, ConfigurationError> {
        let events = EventWriter::new(
            work_dir.join("events.jsonl"),
            uuid::Uuid::new_v4().to_string(),
        );
        let router = ModelRouter::new(&config, events.clone())?;
        Ok(Self::with_router(config, store, work_dir, router, events))
    }

    pub fn with_router(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        work_dir: &Path,
        router: ModelRouter,
        events: EventWriter,
    ) -> Self {
        let generation = GenerationStage::new(
            router.vision(),
            config.generation_retry.clone(),
            work_dir.join("artifacts"),
        );
        let audit = AuditStage::new(router.reasoning(), config.audit_retry.clone());
        let controller = CorrectionController::new(
            Arc::clone(&store),
            generation,
            audit,
            Arc::new(RasterNormalizer::new(config.logo_max_edge)),
            config.policy.clone(),
            events.clone(),
            work_dir.join("logos"),
        );
        Self {
            compressor: Compressor::new(config.twin_budget.clone()),
            config,
            store,
            events,
            controller: Arc::new(controller),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn ingest(&self, brand_id: &str, raw: RawGuideline) -> Result<IngestionReport, PipelineError> {
        Ok(ingest(
            self.store.as_ref(),
            &self.compressor,
            Some(&self.events),
            brand_id,
            raw,
        )?)
    }

    pub fn twin(&self, brand_id: &str) -> Result<Option<CompressedDigitalTwin>, PipelineError> {
        Ok(load(self.store.as_ref(), &keys::twin(brand_id.trim()))?)
    }

    /// Persists a pending job and starts its task. Must be called from
    /// inside a tokio runtime.
    pub fn submit(&self, request: GenerationRequest) -> Result<SubmittedJob, PipelineError> {
        if request.prompt.trim().is_empty() {
            return Err(PipelineError::EmptyPrompt);
        }
        let brand_id = request.brand_id.trim().to_string();
        if self.twin(&brand_id)?.is_none() {
            return Err(PipelineError::UnknownBrand(brand_id));
        }

        let job = GenerationJob::new(
            GenerationRequest {
                brand_id,
                ..request
            },
            self.config.policy.max_attempts,
        );
        save(self.store.as_ref(), &keys::job(&job.job_id), &job)?;
        let ticket = job.ticket();
        info!(job_id = %ticket.job_id, brand_id = %job.brand_id, "job accepted");

        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move { controller.run(job).await });
        Ok(SubmittedJob { ticket, handle })
    }

    pub fn status(&self, job_id: &str) -> Result<Option<JobStatusView>, PipelineError> {
        job_status(self.store.as_ref(), job_id)
    }

    pub fn cancel(&self, job_id: &str) -> Result<bool, PipelineError> {
        request_cancel(self.store.as_ref(), job_id)
    }
}

pub fn job_status(store: &dyn ObjectStore, job_id: &str) -> Result<Option<JobStatusView>, PipelineError> {
    let job: Option<GenerationJob> = load(store, &keys::job(job_id))?;
    Ok(job.map(|job| job.view()))
}

/// Requests cancellation. Returns `false` when the job is unknown or already
/// terminal; otherwise the job stops at its next transition.
pub fn request_cancel(store: &dyn ObjectStore, job_id: &str) -> Result<bool, PipelineError> {
    let job: Option<GenerationJob> = load(store, &keys::job(job_id))?;
    let Some(job) = job else {
        return Ok(false);
    };
    if job.status.is_terminal() {
        return Ok(false);
    }
    store.put(
        &keys::job_cancel(job_id),
        json!({
            "job_id": job_id,
            "requested_at": chrono::Utc::now().to_rfc3339(),
        }),
    )?;
    info!(job_id, status = job.status.as_str(), "cancel requested");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use brandgov_contracts::brand::{RawColor, RawGuideline};
    use brandgov_contracts::events::EventWriter;
    use brandgov_contracts::jobs::{GenerationRequest, JobStatus};
    use brandgov_contracts::store::{JsonFileStore, MemoryStore, ObjectStore};

    use super::BrandPipeline;
    use crate::config::PipelineConfig;
    use crate::error::PipelineError;
    use crate::router::ModelRouter;
    use crate::test_support::{ScriptedReasoner, ScriptedVision};

    fn raw() -> RawGuideline {
        RawGuideline {
            colors: vec![RawColor {
                name: "Ocean".to_string(),
                hex: "#0055AA".to_string(),
                label: Some("Primary".to_string()),
                context: None,
                coverage: None,
            }],
            fonts: Vec::new(),
            rules_text: vec!["Don't stretch the logo".to_string()],
            logo_rules: Default::default(),
        }
    }

    fn scripted(work_dir: &std::path::Path, scores: &[f64]) -> BrandPipeline {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let events = EventWriter::new(work_dir.join("events.jsonl"), "pipe");
        let router = ModelRouter::with_backends(
            "auditor",
            Arc::new(ScriptedReasoner::scores(scores)),
            "painter",
            Arc::new(ScriptedVision::succeeding()),
            events.clone(),
        );
        BrandPipeline::with_router(PipelineConfig::default(), store, work_dir, router, events)
    }

    #[tokio::test]
    async fn submit_rejects_unknown_brand_and_empty_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = scripted(temp.path(), &[]);
        assert!(matches!(
            pipeline.submit(GenerationRequest::new("acme", "banner")),
            Err(PipelineError::UnknownBrand(brand)) if brand == "acme"
        ));
        pipeline.ingest("acme", raw())?;
        assert!(matches!(
            pipeline.submit(GenerationRequest::new("acme", "   ")),
            Err(PipelineError::EmptyPrompt)
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_job_starts_pending_and_completes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = scripted(temp.path(), &[97.0]);
        pipeline.ingest("acme", raw())?;

        let submitted = pipeline.submit(GenerationRequest::new("acme", "banner"))?;
        assert_eq!(submitted.ticket.status, JobStatus::Pending);
        let job_id = submitted.ticket.job_id.clone();
        assert_eq!(
            pipeline.status(&job_id)?.map(|view| view.status),
            Some(JobStatus::Pending)
        );

        let done = submitted.wait().await?;
        assert_eq!(done.status, JobStatus::Completed);
        let view = pipeline.status(&job_id)?;
        assert_eq!(view.as_ref().map(|view| view.attempt_count), Some(1));
        assert_eq!(view.and_then(|view| view.compliance_score), Some(97.0));

        assert!(!pipeline.cancel(&job_id)?);
        assert!(!pipeline.cancel("no-such-job")?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_transition() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = scripted(temp.path(), &[97.0]);
        pipeline.ingest("acme", raw())?;

        let submitted = pipeline.submit(GenerationRequest::new("acme", "banner"))?;
        assert!(pipeline.cancel(&submitted.ticket.job_id)?);
        let done = submitted.wait().await?;
        assert_eq!(done.status, JobStatus::Cancelled);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_concurrently_against_shared_twin() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = scripted(temp.path(), &[97.0, 96.0, 99.0]);
        pipeline.ingest("acme", raw())?;

        let jobs = vec![
            pipeline.submit(GenerationRequest::new("acme", "banner one"))?,
            pipeline.submit(GenerationRequest::new("acme", "banner two"))?,
            pipeline.submit(GenerationRequest::new("acme", "banner three"))?,
        ];
        for submitted in jobs {
            let done = submitted.wait().await?;
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.attempt_count, 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn dryrun_pipeline_end_to_end_on_file_store() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store: Arc<dyn ObjectStore> = Arc::new(JsonFileStore::new(temp.path().join("store.json")));
        let config = PipelineConfig {
            credential: None,
            reasoning_model: "dryrun-reasoning-1".to_string(),
            vision_model: "dryrun-vision-1".to_string(),
            ..PipelineConfig::default()
        };
        let pipeline = BrandPipeline::new(config, store, temp.path())?;
        let report = pipeline.ingest("acme", raw())?;
        assert_eq!(report.twin.primary_colors, vec!["#0055AA"]);

        let done = pipeline
            .submit(GenerationRequest::new("acme", "summer sale banner"))?
            .wait()
            .await?;
        assert!(done.status.is_terminal());
        assert_ne!(done.status, JobStatus::Failed);
        let image_ref = done.image_ref.unwrap_or_default();
        assert!(std::path::Path::new(&image_ref).exists());

        let reopened = JsonFileStore::new(temp.path().join("store.json"));
        let stored = reopened.get(&brandgov_contracts::store::keys::job(&done.job_id))?;
        assert!(stored.is_some());
        Ok(())
    }
}
