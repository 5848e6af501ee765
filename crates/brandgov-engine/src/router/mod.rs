//! Capability-scoped access to the two backing models.
//!
//! Stages never pick a model. They hold a [`ReasoningCapability`] or a
//! [`VisionCapability`], each bound at construction to one model id, and
//! every call through either handle is timed and logged as a `model_call`
//! event.

mod dryrun;
mod gemini;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brandgov_contracts::brand::estimate_text_tokens;
use brandgov_contracts::events::{CallRecord, EventWriter, OperationType, MODEL_CALL_EVENT};
use brandgov_contracts::models::{Capability, ModelSelector, ModelSpec};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{ConfigurationError, ModelError};
use crate::truncate_text;

pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReasonRequest {
    pub instructions: String,
    pub prompt: String,
    pub images: Vec<PathBuf>,
    /// Ask the backend for a JSON-only answer.
    pub json_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonResponse {
    pub text: String,
    pub token_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionRequest {
    pub out_dir: PathBuf,
    pub file_stem: String,
    pub prompt: String,
    /// Serialized digital twin. Sent exactly once per call.
    pub brand_context: String,
    pub references: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionResponse {
    pub image_path: PathBuf,
    pub mime_type: String,
    pub token_count: u64,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn provider(&self) -> &str;
    async fn reason(
        &self,
        model: &str,
        request: &ReasonRequest,
        timeout: Duration,
    ) -> Result<ReasonResponse, ModelError>;
}

#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn provider(&self) -> &str;
    async fn generate(
        &self,
        model: &str,
        request: &VisionRequest,
        timeout: Duration,
    ) -> Result<VisionResponse, ModelError>;
}

#[derive(Clone)]
pub struct ReasoningCapability {
    model: String,
    backend: Arc<dyn ReasoningBackend>,
    events: EventWriter,
}

impl ReasoningCapability {
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn reason(
        &self,
        request: &ReasonRequest,
        timeout: Duration,
    ) -> Result<ReasonResponse, ModelError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            self.backend.reason(&self.model, request, timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ModelError::Timeout { after: timeout }),
        };
        let token_count = match &outcome {
            Ok(response) => response.token_count,
            Err(_) => estimate_text_tokens(&request.instructions) + estimate_text_tokens(&request.prompt),
        };
        log_call(
            &self.events,
            self.backend.provider(),
            &self.model,
            OperationType::Reason,
            started,
            token_count,
            outcome.as_ref().err(),
        );
        outcome
    }
}

#[derive(Clone)]
pub struct VisionCapability {
    model: String,
    backend: Arc<dyn VisionBackend>,
    events: EventWriter,
}

impl VisionCapability {
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn see_and_generate(
        &self,
        request: &VisionRequest,
        timeout: Duration,
    ) -> Result<VisionResponse, ModelError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            self.backend.generate(&self.model, request, timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ModelError::Timeout { after: timeout }),
        };
        let token_count = match &outcome {
            Ok(response) => response.token_count,
            Err(_) => estimate_text_tokens(&request.prompt) + estimate_text_tokens(&request.brand_context),
        };
        log_call(
            &self.events,
            self.backend.provider(),
            &self.model,
            OperationType::SeeAndGenerate,
            started,
            token_count,
            outcome.as_ref().err(),
        );
        outcome
    }
}

pub struct ModelRouter {
    reasoning: ReasoningCapability,
    vision: VisionCapability,
}

impl ModelRouter {
    /// Resolves both model ids against the registry and builds their
    /// backends. Fails before any call is made when a model id is unknown or
    /// lacks its capability, or when a provider needs a credential that is
    /// absent.
    pub fn new(config: &PipelineConfig, events: EventWriter) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let selector = ModelSelector::default();
        let reasoning_model = resolve_model(&selector, &config.reasoning_model, Capability::Reasoning)?;
        let vision_model = resolve_model(&selector, &config.vision_model, Capability::Vision)?;
        let credential = config
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        for model in [&reasoning_model, &vision_model] {
            if model.needs_credential() && credential.is_none() {
                return Err(ConfigurationError::MissingCredential {
                    provider: model.provider.clone(),
                });
            }
        }

        let mut gemini: Option<Arc<GeminiBackend>> = None;
        let mut gemini_backend = || -> Arc<GeminiBackend> {
            let api_key = credential.unwrap_or_default();
            gemini
                .get_or_insert_with(|| Arc::new(GeminiBackend::new(&config.api_base, api_key)))
                .clone()
        };

        let reasoning: Arc<dyn ReasoningBackend> = match reasoning_model.provider.as_str() {
            "dryrun" => Arc::new(DryrunBackend::new()),
            "gemini" => gemini_backend(),
            other => return Err(ConfigurationError::UnsupportedProvider(other.to_string())),
        };
        let vision: Arc<dyn VisionBackend> = match vision_model.provider.as_str() {
            "dryrun" => Arc::new(DryrunBackend::new()),
            "gemini" => gemini_backend(),
            other => return Err(ConfigurationError::UnsupportedProvider(other.to_string())),
        };

        Ok(Self::with_backends(
            reasoning_model.name,
            reasoning,
            vision_model.name,
            vision,
            events,
        ))
    }

    pub fn with_backends(
        reasoning_model: impl Into<String>,
        reasoning: Arc<dyn ReasoningBackend>,
        vision_model: impl Into<String>,
        vision: Arc<dyn VisionBackend>,
        events: EventWriter,
    ) -> Self {
        Self {
            reasoning: ReasoningCapability {
                model: reasoning_model.into(),
                backend: reasoning,
                events: events.clone(),
            },
            vision: VisionCapability {
                model: vision_model.into(),
                backend: vision,
                events,
            },
        }
    }

    pub fn reasoning(&self) -> ReasoningCapability {
        self.reasoning.clone()
    }

    pub fn vision(&self) -> VisionCapability {
        self.vision.clone()
    }

    pub async fn reason(
        &self,
        request: &ReasonRequest,
        timeout: Duration,
    ) -> Result<ReasonResponse, ModelError> {
        self.reasoning.reason(request, timeout).await
    }

    pub async fn see_and_generate(
        &self,
        request: &VisionRequest,
        timeout: Duration,
    ) -> Result<VisionResponse, ModelError> {
        self.vision.see_and_generate(request, timeout).await
    }
}

fn resolve_model(
    selector: &ModelSelector,
    requested: &str,
    capability: Capability,
) -> Result<ModelSpec, ConfigurationError> {
    selector
        .select(Some(requested), capability)
        .map(|selection| selection.model)
        .map_err(ConfigurationError::InvalidModel)
}

fn log_call(
    events: &EventWriter,
    provider: &str,
    model: &str,
    operation: OperationType,
    started: Instant,
    token_count: u64,
    error: Option<&ModelError>,
) {
    let record = CallRecord {
        request_id: uuid::Uuid::new_v4().to_string(),
        model_name: model.to_string(),
        operation_type: operation,
        success: error.is_none(),
        latency_ms: started.elapsed().as_millis() as u64,
        token_count,
        error_type: error.map(|err| err.error_type().to_string()),
        error_message: error.map(|err| truncate_text(&err.to_string(), 512)),
    };
    match error {
        None => debug!(
            provider,
            model,
            operation = operation.as_str(),
            latency_ms = record.latency_ms,
            token_count,
            "model call succeeded"
        ),
        Some(err) => warn!(
            provider,
            model,
            operation = operation.as_str(),
            latency_ms = record.latency_ms,
            error_type = err.error_type(),
            error = %err,
            "model call failed"
        ),
    }
    events.record_quietly(MODEL_CALL_EVENT, &record);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use brandgov_contracts::events::{read_events, EventWriter, MODEL_CALL_EVENT};

    use super::{
        ModelRouter, ReasonRequest, ReasonResponse, ReasoningBackend, VisionBackend, VisionRequest,
        VisionResponse,
    };
    use crate::config::PipelineConfig;
    use crate::error::{ConfigurationError, ModelError};

    struct SlowReasoner;

    #[async_trait]
    impl ReasoningBackend for SlowReasoner {
        fn provider(&self) -> &str {
            "slow"
        }

        async fn reason(
            &self,
            _model: &str,
            _request: &ReasonRequest,
            _timeout: Duration,
        ) -> Result<ReasonResponse, ModelError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ReasonResponse {
                text: "{}".to_string(),
                token_count: 1,
            })
        }
    }

    struct FailingVision;

    #[async_trait]
    impl VisionBackend for FailingVision {
        fn provider(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _model: &str,
            _request: &VisionRequest,
            _timeout: Duration,
        ) -> Result<VisionResponse, ModelError> {
            Err(ModelError::RateLimited {
                retry_after: None,
                message: "quota".to_string(),
            })
        }
    }

    fn dryrun_config() -> PipelineConfig {
        PipelineConfig {
            credential: None,
            reasoning_model: "dryrun-reasoning-1".to_string(),
            vision_model: "dryrun-vision-1".to_string(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn gemini_models_require_a_credential() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");

        let config = PipelineConfig {
            credential: Some("   ".to_string()),
            ..PipelineConfig::default()
        };
        let err = ModelRouter::new(&config, events.clone()).err();
        assert_eq!(
            err,
            Some(ConfigurationError::MissingCredential {
                provider: "gemini".to_string()
            })
        );

        assert!(ModelRouter::new(&dryrun_config(), events).is_ok());
        Ok(())
    }

    #[test]
    fn model_ids_are_checked_against_capability() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let config = PipelineConfig {
            reasoning_model: "dryrun-vision-1".to_string(),
            ..dryrun_config()
        };
        match ModelRouter::new(&config, events) {
            Err(ConfigurationError::InvalidModel(message)) => {
                assert!(message.contains("serves 'vision', not 'reasoning'"));
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("router accepted a vision model for reasoning"),
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_are_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let router = ModelRouter::with_backends(
            "slow-reasoner",
            Arc::new(SlowReasoner),
            "failing-vision",
            Arc::new(FailingVision),
            events.clone(),
        );

        let err = router
            .reason(&ReasonRequest::default(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::Timeout {
                after: Duration::from_millis(250)
            }
        );

        let rows = read_events(events.path())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], MODEL_CALL_EVENT);
        assert_eq!(rows[0]["model_name"], "slow-reasoner");
        assert_eq!(rows[0]["operation_type"], "reason");
        assert_eq!(rows[0]["success"], false);
        assert_eq!(rows[0]["error_type"], "timeout");
        assert!(rows[0]["request_id"].as_str().is_some_and(|id| !id.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn vision_failures_carry_error_type() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let router = ModelRouter::with_backends(
            "slow-reasoner",
            Arc::new(SlowReasoner),
            "failing-vision",
            Arc::new(FailingVision),
            events.clone(),
        );
        let request = VisionRequest {
            out_dir: temp.path().to_path_buf(),
            file_stem: "attempt-01".to_string(),
            prompt: "banner".to_string(),
            brand_context: "{}".to_string(),
            references: Vec::new(),
        };
        let err = router
            .vision()
            .see_and_generate(&request, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "rate_limited");

        let rows = read_events(events.path())?;
        assert_eq!(rows[0]["operation_type"], "see_and_generate");
        assert_eq!(rows[0]["model_name"], "failing-vision");
        assert_eq!(rows[0]["error_type"], "rate_limited");
        Ok(())
    }

    #[tokio::test]
    async fn dryrun_router_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let router = ModelRouter::new(&dryrun_config(), events.clone())?;
        assert_eq!(router.vision().model_name(), "dryrun-vision-1");
        assert_eq!(router.reasoning().model_name(), "dryrun-reasoning-1");

        let generated = router
            .see_and_generate(
                &VisionRequest {
                    out_dir: temp.path().join("artifacts"),
                    file_stem: "attempt-01".to_string(),
                    prompt: "summer sale banner".to_string(),
                    brand_context: r##"{"primary_colors":["#0055AA"]}"##.to_string(),
                    references: Vec::new(),
                },
                Duration::from_secs(5),
            )
            .await?;
        assert!(generated.image_path.exists());

        let rows = read_events(events.path())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["success"], true);
        Ok(())
    }
}
