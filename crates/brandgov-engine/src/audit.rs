use std::collections::BTreeMap;
use std::path::PathBuf;

use brandgov_contracts::brand::BrandGuidelines;
use brandgov_contracts::jobs::{ComplianceResult, Severity, Violation};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ModelError;
use crate::retry::RetryPolicy;
use crate::router::{ReasonRequest, ReasoningCapability};

const AUDIT_INSTRUCTIONS: &str = "You are a brand compliance auditor. Compare the attached image \
against the full brand guidelines. Answer with JSON only: {\"overall_score\": 0-100, \
\"category_scores\": {\"color\": 0-100, \"typography\": 0-100, \"logo\": 0-100, \"layout\": 0-100}, \
\"violations\": [{\"category\": string, \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \
\"description\": string, \"fix_suggestion\": string}]}.";

#[derive(Clone)]
pub struct AuditStage {
    reasoning: ReasoningCapability,
    retry: RetryPolicy,
}

impl AuditStage {
    pub fn new(reasoning: ReasoningCapability, retry: RetryPolicy) -> Self {
        Self { reasoning, retry }
    }

    /// Scores `image_ref` against the full guidelines. Never fails: when the
    /// analysis cannot be completed the result is degraded, carries
    /// `last_known_score` (or 0) and a critical `system` violation.
    pub async fn audit(
        &self,
        image_ref: &str,
        guidelines: &BrandGuidelines,
        last_known_score: Option<f64>,
    ) -> ComplianceResult {
        let fallback = last_known_score.unwrap_or(0.0);
        let guidelines_json = match serde_json::to_string(guidelines) {
            Ok(raw) => raw,
            Err(err) => {
                return ComplianceResult::degraded(
                    fallback,
                    format!("guidelines could not be serialized for audit: {err}"),
                )
            }
        };
        let request = ReasonRequest {
            instructions: AUDIT_INSTRUCTIONS.to_string(),
            prompt: format!("FULL_BRAND_GUIDELINES_JSON:\n{guidelines_json}"),
            images: vec![PathBuf::from(image_ref)],
            json_response: true,
        };

        let reasoning = &self.reasoning;
        let request = &request;
        let outcome = self
            .retry
            .run("reason", |_call, timeout| async move {
                let response = reasoning.reason(request, timeout).await?;
                parse_compliance(&response.text)
            })
            .await;

        match outcome {
            Ok(result) => {
                info!(
                    brand_id = %guidelines.brand_id,
                    image = image_ref,
                    score = result.overall_score,
                    violations = result.violations.len(),
                    "audit completed"
                );
                result
            }
            Err(exhausted) => {
                warn!(
                    brand_id = %guidelines.brand_id,
                    image = image_ref,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    fallback_score = fallback,
                    "audit degraded"
                );
                ComplianceResult::degraded(
                    fallback,
                    format!(
                        "audit unavailable after {} attempt(s): {}",
                        exhausted.attempts, exhausted.last_error
                    ),
                )
            }
        }
    }
}

/// Reads the reasoning model's answer. Tolerates code fences and prose
/// around the JSON object; `score` is accepted for `overall_score`.
pub fn parse_compliance(text: &str) -> Result<ComplianceResult, ModelError> {
    let body = json_body(text)
        .ok_or_else(|| ModelError::InvalidResponse("audit answer holds no JSON object".to_string()))?;
    let value: Value = serde_json::from_str(body)
        .map_err(|err| ModelError::InvalidResponse(format!("audit answer is not valid JSON: {err}")))?;

    let overall_score = value
        .get("overall_score")
        .or_else(|| value.get("score"))
        .and_then(number)
        .ok_or_else(|| ModelError::InvalidResponse("audit answer lacks overall_score".to_string()))?;

    let category_scores: BTreeMap<String, f64> = value
        .get("category_scores")
        .and_then(Value::as_object)
        .map(|scores| {
            scores
                .iter()
                .filter_map(|(key, score)| number(score).map(|score| (key.clone(), score)))
                .collect()
        })
        .unwrap_or_default();

    let violations = value
        .get("violations")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(parse_violation).collect())
        .unwrap_or_default();

    Ok(ComplianceResult::new(overall_score, category_scores, violations))
}

fn parse_violation(row: &Value) -> Option<Violation> {
    let row = row.as_object()?;
    let text = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| row.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    };
    let description = text(&["description", "issue", "message"])?;
    Some(Violation {
        category: text(&["category"]).unwrap_or_else(|| "general".to_string()),
        severity: text(&["severity"])
            .and_then(|raw| Severity::parse(&raw))
            .unwrap_or(Severity::Medium),
        description,
        fix_suggestion: text(&["fix_suggestion", "fix", "suggestion"]),
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn json_body(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use brandgov_contracts::brand::{BrandGuidelines, Color, ColorUsage, LogoRules};
    use brandgov_contracts::events::EventWriter;
    use brandgov_contracts::jobs::{Severity, SYSTEM_CATEGORY};

    use super::{parse_compliance, AuditStage};
    use crate::error::ModelError;
    use crate::retry::RetryPolicy;
    use crate::router::ModelRouter;
    use crate::test_support::{audit_json, ScriptedReasoner, ScriptedVision};

    fn guidelines() -> BrandGuidelines {
        BrandGuidelines {
            brand_id: "acme".to_string(),
            colors: vec![
                Color::new("Ocean", "#0055AA", ColorUsage::Primary, 0.4),
                Color::new("Rarely used teal", "#00A3A3", ColorUsage::Secondary, 0.01),
            ],
            fonts: Vec::new(),
            visual_dos: vec!["Use generous whitespace".to_string()],
            visual_donts: Vec::new(),
            logo_rules: LogoRules::default(),
        }
    }

    fn stage(reasoner: Arc<ScriptedReasoner>, events: EventWriter) -> AuditStage {
        let router = ModelRouter::with_backends(
            "auditor",
            reasoner,
            "painter",
            Arc::new(ScriptedVision::succeeding()),
            events,
        );
        AuditStage::new(
            router.reasoning(),
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 10,
                max_delay_ms: 100,
                initial_timeout_ms: 1_000,
                timeout_step_ms: 500,
            },
        )
    }

    #[test]
    fn parses_fenced_answer_with_aliases() -> anyhow::Result<()> {
        let result = parse_compliance(
            "Here you go:\n```json\n{\"score\": \"88\", \"category_scores\": {\"color\": 70, \"logo\": \"n/a\"},\
             \"violations\": [{\"category\": \"color\", \"severity\": \"major\", \"issue\": \"Off palette\", \"fix\": \"Use #0055AA\"},\
             {\"category\": \"logo\"}]}\n```",
        )?;
        assert_eq!(result.overall_score, 88.0);
        assert_eq!(result.category_scores.len(), 1);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].severity, Severity::High);
        assert_eq!(result.violations[0].fix_suggestion.as_deref(), Some("Use #0055AA"));
        assert!(!result.degraded);
        Ok(())
    }

    #[test]
    fn scores_are_clamped() -> anyhow::Result<()> {
        assert_eq!(parse_compliance(r#"{"overall_score": 140}"#)?.overall_score, 100.0);
        assert!(parse_compliance(r#"{"violations": []}"#).is_err());
        assert!(parse_compliance("no json here").is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn audit_sends_full_guidelines_and_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let reasoner = Arc::new(ScriptedReasoner::scores(&[91.0]));
        let result = stage(reasoner.clone(), events)
            .audit("/artifacts/job/attempt-01.png", &guidelines(), None)
            .await;

        assert_eq!(result.overall_score, 91.0);
        let requests = reasoner.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("Rarely used teal"));
        assert!(requests[0].json_response);
        assert_eq!(requests[0].images[0].to_string_lossy(), "/artifacts/job/attempt-01.png");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_answer_is_retried() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let reasoner = Arc::new(ScriptedReasoner::replies(vec![
            Ok("I could not decide.".to_string()),
            Ok(audit_json(97.0)),
        ]));
        let result = stage(reasoner.clone(), events)
            .audit("img.png", &guidelines(), None)
            .await;
        assert_eq!(result.overall_score, 97.0);
        assert_eq!(reasoner.calls(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failure_degrades_with_last_known_score() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "pipe");
        let reasoner = Arc::new(ScriptedReasoner::replies(vec![
            Err(ModelError::Timeout {
                after: std::time::Duration::from_secs(1),
            }),
            Err(ModelError::Server {
                status: 500,
                body: "boom".to_string(),
            }),
        ]));
        let result = stage(reasoner.clone(), events.clone())
            .audit("img.png", &guidelines(), Some(62.0))
            .await;

        assert!(result.degraded);
        assert_eq!(result.overall_score, 62.0);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].category, SYSTEM_CATEGORY);
        assert_eq!(result.violations[0].severity, Severity::Critical);
        assert!(result.violations[0].description.contains("500"));
        assert_eq!(reasoner.calls(), 2);

        let unauthorized = Arc::new(ScriptedReasoner::replies(vec![Err(ModelError::Unauthorized(
            "bad key".to_string(),
        ))]));
        let result = stage(unauthorized.clone(), events)
            .audit("img.png", &guidelines(), None)
            .await;
        assert!(result.degraded);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(unauthorized.calls(), 1);
        Ok(())
    }
}
