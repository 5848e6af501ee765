use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use brandgov_contracts::brand::estimate_text_tokens;
use image::{Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{
    ReasonRequest, ReasonResponse, ReasoningBackend, VisionBackend, VisionRequest, VisionResponse,
};
use crate::error::ModelError;

const DRYRUN_EDGE: u32 = 512;

/// Offline backend. Images are solid fills derived from the prompt and brand
/// context; audits are scored from a hash of the request, so the same input
/// always yields the same answer.
#[derive(Debug, Clone, Default)]
pub struct DryrunBackend;

impl DryrunBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReasoningBackend for DryrunBackend {
    fn provider(&self) -> &str {
        "dryrun"
    }

    async fn reason(
        &self,
        _model: &str,
        request: &ReasonRequest,
        _timeout: Duration,
    ) -> Result<ReasonResponse, ModelError> {
        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        for image in &request.images {
            hasher.update(image.to_string_lossy().as_bytes());
        }
        let digest = hasher.finalize();
        let score = 80 + u32::from(digest[0] % 21);

        let violations = if score < 95 {
            vec![json!({
                "category": "color",
                "severity": "medium",
                "description": "Accent color covers more area than the palette allows.",
                "fix_suggestion": "Reduce the accent color to small highlights only.",
            })]
        } else {
            Vec::new()
        };
        let payload = json!({
            "overall_score": score,
            "category_scores": {
                "color": score,
                "typography": 100,
                "logo": 100,
            },
            "violations": violations,
        });
        let text = payload.to_string();
        Ok(ReasonResponse {
            token_count: estimate_text_tokens(&request.instructions)
                + estimate_text_tokens(&request.prompt)
                + estimate_text_tokens(&text),
            text,
        })
    }
}

#[async_trait]
impl VisionBackend for DryrunBackend {
    fn provider(&self) -> &str {
        "dryrun"
    }

    async fn generate(
        &self,
        _model: &str,
        request: &VisionRequest,
        _timeout: Duration,
    ) -> Result<VisionResponse, ModelError> {
        std::fs::create_dir_all(&request.out_dir).map_err(|err| {
            ModelError::Transport(format!(
                "failed to create {}: {err}",
                request.out_dir.display()
            ))
        })?;
        let image_path = request.out_dir.join(format!("{}.png", request.file_stem));
        write_dryrun_image(&image_path, &request.prompt, &request.brand_context)?;
        Ok(VisionResponse {
            image_path,
            mime_type: "image/png".to_string(),
            token_count: estimate_text_tokens(&request.prompt)
                + estimate_text_tokens(&request.brand_context),
        })
    }
}

fn write_dryrun_image(path: &Path, prompt: &str, brand_context: &str) -> Result<(), ModelError> {
    let (r, g, b) = color_from_prompt(prompt, brand_context);
    let mut image = RgbImage::new(DRYRUN_EDGE, DRYRUN_EDGE);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    image
        .save(path)
        .map_err(|err| ModelError::Transport(format!("failed to save {}: {err}", path.display())))
}

fn color_from_prompt(prompt: &str, brand_context: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(brand_context.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
