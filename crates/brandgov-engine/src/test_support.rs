use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ModelError;
use crate::router::{
    ReasonRequest, ReasonResponse, ReasoningBackend, VisionBackend, VisionRequest, VisionResponse,
};

/// Vision backend that either always fails with one error or always answers
/// with a path under the requested output directory.
pub struct ScriptedVision {
    failure: Option<ModelError>,
    calls: AtomicU32,
    timeouts: Mutex<Vec<Duration>>,
    requests: Mutex<Vec<VisionRequest>>,
}

impl ScriptedVision {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            calls: AtomicU32::new(0),
            timeouts: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: ModelError) -> Self {
        Self {
            failure: Some(err),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<VisionRequest> {
        self.requests.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VisionBackend for ScriptedVision {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _model: &str,
        request: &VisionRequest,
        timeout: Duration,
    ) -> Result<VisionResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.timeouts.lock() {
            seen.push(timeout);
        }
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(VisionResponse {
            image_path: request.out_dir.join(format!("{}.png", request.file_stem)),
            mime_type: "image/png".to_string(),
            token_count: 10,
        })
    }
}

/// Reasoning backend that replays queued answers in order. An empty queue
/// answers with an invalid response.
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: AtomicU32,
    requests: Mutex<Vec<ReasonRequest>>,
}

impl ScriptedReasoner {
    pub fn replies(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One audit answer per score. Scores below 95 come with a color
    /// violation carrying a fix suggestion.
    pub fn scores(scores: &[f64]) -> Self {
        Self::replies(scores.iter().map(|score| Ok(audit_json(*score))).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ReasonRequest> {
        self.requests.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

pub fn audit_json(score: f64) -> String {
    let violations = if score < 95.0 {
        vec![json!({
            "category": "color",
            "severity": "high",
            "description": format!("Off-palette background (score {score})"),
            "fix_suggestion": "Use the neutral #F5F1E8 for the background.",
        })]
    } else {
        Vec::new()
    };
    json!({
        "overall_score": score,
        "category_scores": {"color": score},
        "violations": violations,
    })
    .to_string()
}

#[async_trait]
impl ReasoningBackend for ScriptedReasoner {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn reason(
        &self,
        _model: &str,
        request: &ReasonRequest,
        _timeout: Duration,
    ) -> Result<ReasonResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match next {
            Some(Ok(text)) => Ok(ReasonResponse {
                text,
                token_count: 20,
            }),
            Some(Err(err)) => Err(err),
            None => Err(ModelError::InvalidResponse("script exhausted".to_string())),
        }
    }
}
