use std::time::Duration;

use brandgov_contracts::jobs::TransitionError;
use brandgov_contracts::store::StoreError;
use thiserror::Error;

/// Startup-time problems. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("credential for provider '{provider}' is missing or empty")]
    MissingCredential { provider: String },
    #[error("{capability} model id is missing or empty")]
    MissingModel { capability: &'static str },
    #[error("{0}")]
    InvalidModel(String),
    #[error("no backend available for provider '{0}'")]
    UnsupportedProvider(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of one external model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("call timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::Unauthorized(_) | ModelError::Rejected { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ModelError::Unauthorized(_) => "unauthorized",
            ModelError::RateLimited { .. } => "rate_limited",
            ModelError::Timeout { .. } => "timeout",
            ModelError::Transport(_) => "transport",
            ModelError::Server { .. } => "server",
            ModelError::Rejected { .. } => "rejected",
            ModelError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Request URLs are stripped so nothing from the query string reaches logs or
/// job records.
impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            return ModelError::InvalidResponse(err.to_string());
        }
        ModelError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation failed after {attempts} attempt(s): {last_error}")]
pub struct GenerationFailed {
    pub attempts: u32,
    #[source]
    pub last_error: ModelError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    /// Only seen inside the compressor while it is still reducing.
    #[error("twin needs {tokens} tokens, ceiling is {ceiling}")]
    BudgetExceeded { tokens: u64, ceiling: u64 },
    #[error("minimal twin still needs {tokens} tokens, ceiling is {ceiling}")]
    IrreducibleGuidelines { tokens: u64, ceiling: u64 },
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("brand id is empty")]
    EmptyBrandId,
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors inside a job run. The controller turns every one of these into a
/// terminal job state; none escape to its caller.
#[derive(Debug, Error)]
pub(crate) enum StageError {
    #[error("job was cancelled")]
    Cancelled,
    #[error("brand '{0}' has no stored guidelines")]
    MissingGuidelines(String),
    #[error("brand '{0}' has no stored digital twin")]
    MissingTwin(String),
    #[error(transparent)]
    Generation(#[from] GenerationFailed),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("brand '{0}' has not been ingested")]
    UnknownBrand(String),
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("job task failed to join: {0}")]
    Join(String),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
