use std::env;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;

pub const DEFAULT_REASONING_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_VISION_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Score cut-offs and attempt budget for the correction loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionPolicy {
    pub accept_threshold: f64,
    pub review_threshold: f64,
    pub max_attempts: u32,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            accept_threshold: 95.0,
            review_threshold: 70.0,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinBudget {
    pub max_tokens: u64,
    pub max_rule_words: usize,
}

impl Default for TwinBudget {
    fn default() -> Self {
        Self {
            max_tokens: 60_000,
            max_rule_words: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub api_base: String,
    pub reasoning_model: String,
    pub vision_model: String,
    pub policy: CorrectionPolicy,
    pub generation_retry: RetryPolicy,
    pub audit_retry: RetryPolicy,
    pub twin_budget: TwinBudget,
    pub logo_max_edge: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            credential: None,
            api_base: DEFAULT_API_BASE.to_string(),
            reasoning_model: DEFAULT_REASONING_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            policy: CorrectionPolicy::default(),
            generation_retry: RetryPolicy::generation_default(),
            audit_retry: RetryPolicy::audit_default(),
            twin_budget: TwinBudget::default(),
            logo_max_edge: 1024,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the optional JSON file, then environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading config {}", path.display()))?;
                serde_json::from_str::<PipelineConfig>(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(credential) = non_empty_env("BRANDGOV_API_KEY")
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
        {
            self.credential = Some(credential);
        }
        if let Some(api_base) = non_empty_env("BRANDGOV_API_BASE") {
            self.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("BRANDGOV_REASONING_MODEL") {
            self.reasoning_model = model;
        }
        if let Some(model) = non_empty_env("BRANDGOV_VISION_MODEL") {
            self.vision_model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reasoning_model.trim().is_empty() {
            return Err(ConfigurationError::MissingModel {
                capability: "reasoning",
            });
        }
        if self.vision_model.trim().is_empty() {
            return Err(ConfigurationError::MissingModel {
                capability: "vision",
            });
        }
        let policy = &self.policy;
        let in_range = |value: f64| (0.0..=100.0).contains(&value);
        if !in_range(policy.accept_threshold) || !in_range(policy.review_threshold) {
            return Err(ConfigurationError::Invalid(
                "thresholds must lie within 0..=100".to_string(),
            ));
        }
        if policy.review_threshold > policy.accept_threshold {
            return Err(ConfigurationError::Invalid(format!(
                "review_threshold {} exceeds accept_threshold {}",
                policy.review_threshold, policy.accept_threshold
            )));
        }
        if policy.max_attempts == 0 {
            return Err(ConfigurationError::Invalid(
                "policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.twin_budget.max_tokens == 0 {
            return Err(ConfigurationError::Invalid(
                "twin_budget.max_tokens must be positive".to_string(),
            ));
        }
        self.generation_retry.validate("generation_retry")?;
        self.audit_retry.validate("audit_retry")?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
