use std::path::PathBuf;

use brandgov_contracts::brand::CompressedDigitalTwin;
use tracing::info;

use crate::error::GenerationFailed;
use crate::retry::RetryPolicy;
use crate::router::{VisionCapability, VisionRequest};

#[derive(Clone)]
pub struct GenerationStage {
    vision: VisionCapability,
    retry: RetryPolicy,
    artifacts_dir: PathBuf,
}

impl GenerationStage {
    pub fn new(vision: VisionCapability, retry: RetryPolicy, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            vision,
            retry,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Produces one image for `prompt` steered by `twin` and returns its
    /// reference. Images land in `<artifacts>/<job_id>/attempt-NN.*`.
    pub async fn generate(
        &self,
        job_id: &str,
        attempt: u32,
        prompt: &str,
        twin: &CompressedDigitalTwin,
        references: &[PathBuf],
    ) -> Result<String, GenerationFailed> {
        let request = VisionRequest {
            out_dir: self.artifacts_dir.join(job_id),
            file_stem: format!("attempt-{attempt:02}"),
            prompt: prompt.to_string(),
            brand_context: twin.to_json_string(),
            references: references.to_vec(),
        };
        let vision = &self.vision;
        let request = &request;
        let response = self
            .retry
            .run("see_and_generate", |_call, timeout| async move {
                vision.see_and_generate(request, timeout).await
            })
            .await
            .map_err(|exhausted| GenerationFailed {
                attempts: exhausted.attempts,
                last_error: exhausted.last_error,
            })?;

        info!(
            job_id,
            attempt,
            model = vision.model_name(),
            image = %response.image_path.display(),
            "image generated"
        );
        Ok(response.image_path.display().to_string())
    }
}

/// Appends the latest correction to the user's prompt.
pub fn compose_prompt(prompt: &str, tweak: Option<&str>) -> String {
    match tweak.map(str::trim).filter(|value| !value.is_empty()) {
        Some(tweak) => format!("{}\n\nCorrection required: {tweak}", prompt.trim()),
        None => prompt.trim().to_string(),
    }
}
