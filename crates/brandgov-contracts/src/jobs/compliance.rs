use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SYSTEM_CATEGORY: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "major" => Some(Severity::High),
            "critical" | "blocker" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub category: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub fix_suggestion: Option<String>,
}

impl Violation {
    pub fn is_system(&self) -> bool {
        self.category == SYSTEM_CATEGORY
    }
}

/// Outcome of one audit. `degraded` is set when the audit itself failed and
/// the score is a fallback rather than a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub overall_score: f64,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub degraded: bool,
}

impl ComplianceResult {
    pub fn new(
        overall_score: f64,
        category_scores: BTreeMap<String, f64>,
        violations: Vec<Violation>,
    ) -> Self {
        Self {
            overall_score: clamp_score(overall_score),
            category_scores: category_scores
                .into_iter()
                .map(|(key, value)| (key, clamp_score(value)))
                .collect(),
            violations,
            degraded: false,
        }
    }

    pub fn degraded(fallback_score: f64, reason: impl Into<String>) -> Self {
        Self {
            overall_score: clamp_score(fallback_score),
            category_scores: BTreeMap::new(),
            violations: vec![Violation {
                category: SYSTEM_CATEGORY.to_string(),
                severity: Severity::Critical,
                description: reason.into(),
                fix_suggestion: None,
            }],
            degraded: true,
        }
    }

    /// Most severe brand violation; system annotations are only returned when
    /// nothing else was reported. Earlier entries win ties.
    pub fn most_severe_violation(&self) -> Option<&Violation> {
        let pick = |system: bool| {
            self.violations
                .iter()
                .filter(|violation| violation.is_system() == system)
                .fold(None::<&Violation>, |best, violation| match best {
                    Some(current) if current.severity >= violation.severity => Some(current),
                    _ => Some(violation),
                })
        };
        pick(false).or_else(|| pick(true))
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}
