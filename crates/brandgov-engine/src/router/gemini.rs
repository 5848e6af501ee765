use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use brandgov_contracts::brand::estimate_text_tokens;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use super::{
    ReasonRequest, ReasonResponse, ReasoningBackend, VisionBackend, VisionRequest, VisionResponse,
};
use crate::error::ModelError;
use crate::truncate_text;

const BRAND_CONTEXT_LABEL: &str = "BRAND_TWIN_JSON:";
const API_KEY_HEADER: &str = "x-goog-api-key";
/// Upper bound on a server-supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3_600);

/// `generateContent` client shared by both capabilities.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(api_base: &str, api_key: &str) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    async fn post(&self, model: &str, payload: &Value, timeout: Duration) -> Result<Value, ModelError> {
        let response = self
            .http
            .post(self.endpoint_for_model(model))
            .header(API_KEY_HEADER, self.api_key.as_str())
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ModelError::Timeout { after: timeout }
                } else {
                    ModelError::from(err)
                }
            })?;
        response_json_or_error(response).await
    }
}

#[async_trait]
impl ReasoningBackend for GeminiBackend {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn reason(
        &self,
        model: &str,
        request: &ReasonRequest,
        timeout: Duration,
    ) -> Result<ReasonResponse, ModelError> {
        let payload = reason_payload(request)?;
        let response = self.post(model, &payload, timeout).await?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse(
                "Gemini returned no text parts".to_string(),
            ));
        }
        let token_count = usage_tokens(&response).unwrap_or_else(|| {
            estimate_text_tokens(&request.instructions)
                + estimate_text_tokens(&request.prompt)
                + estimate_text_tokens(&text)
        });
        Ok(ReasonResponse { text, token_count })
    }
}

#[async_trait]
impl VisionBackend for GeminiBackend {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        model: &str,
        request: &VisionRequest,
        timeout: Duration,
    ) -> Result<VisionResponse, ModelError> {
        let payload = vision_payload(request)?;
        let response = self.post(model, &payload, timeout).await?;
        let Some((bytes, mime_type)) = extract_first_image(&response)? else {
            return Err(ModelError::InvalidResponse(
                "Gemini returned no images".to_string(),
            ));
        };

        let ext = extension_for_mime(&mime_type);
        let image_path = request.out_dir.join(format!("{}.{ext}", request.file_stem));
        tokio::fs::create_dir_all(&request.out_dir)
            .await
            .map_err(|err| {
                ModelError::Transport(format!(
                    "failed to create {}: {err}",
                    request.out_dir.display()
                ))
            })?;
        tokio::fs::write(&image_path, bytes).await.map_err(|err| {
            ModelError::Transport(format!("failed to write {}: {err}", image_path.display()))
        })?;

        let token_count = usage_tokens(&response).unwrap_or_else(|| {
            estimate_text_tokens(&request.prompt) + estimate_text_tokens(&request.brand_context)
        });
        Ok(VisionResponse {
            image_path,
            mime_type,
            token_count,
        })
    }
}

fn reason_payload(request: &ReasonRequest) -> Result<Value, ModelError> {
    let mut parts = Vec::new();
    for image in &request.images {
        parts.push(image_part_from_path(image)?);
    }
    parts.push(json!({ "text": request.prompt }));

    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": parts }]),
    );
    if !request.instructions.trim().is_empty() {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": request.instructions }] }),
        );
    }
    if request.json_response {
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseMimeType": "application/json" }),
        );
    }
    Ok(Value::Object(payload))
}

/// Reference images first, then the twin once, then the prompt.
fn vision_payload(request: &VisionRequest) -> Result<Value, ModelError> {
    let mut parts = Vec::new();
    for reference in &request.references {
        parts.push(image_part_from_path(reference)?);
    }
    parts.push(json!({
        "text": format!("{BRAND_CONTEXT_LABEL}\n{}", request.brand_context),
    }));
    parts.push(json!({ "text": request.prompt }));
    Ok(json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "candidateCount": 1,
            "responseModalities": ["IMAGE"],
        },
    }))
}

async fn response_json_or_error(response: HttpResponse) -> Result<Value, ModelError> {
    let status = response.status();
    let code = status.as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await?;
    if !status.is_success() {
        return Err(classify_status(code, retry_after, truncate_text(&body, 512)));
    }
    serde_json::from_str(&body)
        .map_err(|err| ModelError::InvalidResponse(format!("Gemini returned invalid JSON payload: {err}")))
}

pub(crate) fn classify_status(code: u16, retry_after: Option<Duration>, body: String) -> ModelError {
    match code {
        401 | 403 => ModelError::Unauthorized(format!("Gemini request failed ({code}): {body}")),
        429 => ModelError::RateLimited {
            retry_after,
            message: body,
        },
        500..=599 => ModelError::Server { status: code, body },
        _ => ModelError::Rejected { status: code, body },
    }
}

/// Accepts delta-seconds (`"12"`, `"1.5"`) or an HTTP date. Values are
/// capped at [`MAX_RETRY_AFTER`].
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let wait = match raw.parse::<f64>() {
        Ok(seconds) if seconds.is_nan() || seconds < 0.0 => return None,
        Ok(seconds) => Duration::try_from_secs_f64(seconds.min(MAX_RETRY_AFTER.as_secs_f64())).ok()?,
        Err(_) => {
            let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
            let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
            delta.to_std().unwrap_or(Duration::ZERO)
        }
    };
    Some(wait.min(MAX_RETRY_AFTER))
}

fn candidate_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
}

fn extract_text(response: &Value) -> String {
    candidate_parts(response)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

fn extract_first_image(response: &Value) -> Result<Option<(Vec<u8>, String)>, ModelError> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| ModelError::InvalidResponse(format!("Gemini image base64 decode failed: {err}")))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        return Ok(Some((bytes, mime_type)));
    }
    Ok(None)
}

fn usage_tokens(response: &Value) -> Option<u64> {
    response
        .get("usageMetadata")
        .and_then(|usage| usage.get("totalTokenCount"))
        .and_then(Value::as_u64)
}

fn image_part_from_path(path: &Path) -> Result<Value, ModelError> {
    let bytes = std::fs::read(path).map_err(|err| {
        ModelError::Rejected {
            status: 0,
            body: format!("failed reading {}: {err}", path.display()),
        }
    })?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    }))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use serde_json::json;

    use super::{
        classify_status, extract_first_image, extract_text, parse_retry_after, reason_payload,
        usage_tokens, vision_payload, GeminiBackend, BRAND_CONTEXT_LABEL, MAX_RETRY_AFTER,
    };
    use crate::error::ModelError;
    use crate::router::{ReasonRequest, ReasoningBackend, VisionRequest};

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_ids() {
        let backend = GeminiBackend::new("https://example.test/v1beta/", "key");
        assert_eq!(
            backend.endpoint_for_model("gemini-2.5-pro"),
            "https://example.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(
            backend.endpoint_for_model("models/gemini-2.5-pro"),
            "https://example.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            classify_status(401, None, String::new()),
            ModelError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(403, None, String::new()),
            ModelError::Unauthorized(_)
        ));
        assert_eq!(
            classify_status(429, Some(Duration::from_secs(2)), "slow".to_string()).retry_after(),
            Some(Duration::from_secs(2))
        );
        assert!(matches!(
            classify_status(503, None, String::new()),
            ModelError::Server { status: 503, .. }
        ));
        let rejected = classify_status(400, None, "bad".to_string());
        assert!(matches!(rejected, ModelError::Rejected { status: 400, .. }));
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn retry_after_parses_seconds_and_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn huge_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        for raw in ["1e30", "inf", "86400", "Fri, 01 Jan 2100 00:00:00 GMT"] {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(raw));
            assert_eq!(parse_retry_after(&headers), Some(MAX_RETRY_AFTER), "{raw}");
        }
        headers.insert(RETRY_AFTER, HeaderValue::from_static("NaN"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn transport_errors_never_carry_the_api_key() -> anyhow::Result<()> {
        let backend = GeminiBackend::new("http://127.0.0.1:1/v1beta", "SECRET123");
        let err = backend
            .reason(
                "gemini-2.5-pro",
                &ReasonRequest {
                    prompt: "{}".to_string(),
                    ..ReasonRequest::default()
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Transport(_) | ModelError::Timeout { .. }));
        assert!(!err.to_string().contains("SECRET123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET123"));
        Ok(())
    }

    #[test]
    fn vision_payload_carries_twin_exactly_once() -> anyhow::Result<()> {
        let request = VisionRequest {
            out_dir: "/tmp".into(),
            file_stem: "attempt-01".to_string(),
            prompt: "summer sale banner".to_string(),
            brand_context: r##"{"primary_colors":["#0055AA"]}"##.to_string(),
            references: Vec::new(),
        };
        let payload = vision_payload(&request)?;
        let raw = serde_json::to_string(&payload)?;
        assert_eq!(raw.matches(BRAND_CONTEXT_LABEL).count(), 1);
        assert_eq!(raw.matches("primary_colors").count(), 1);
        assert_eq!(payload["generationConfig"]["responseModalities"][0], "IMAGE");
        Ok(())
    }

    #[test]
    fn reason_payload_requests_json_and_inlines_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("render.png");
        std::fs::write(&image_path, [1u8, 2, 3])?;
        let payload = reason_payload(&ReasonRequest {
            instructions: "audit".to_string(),
            prompt: "{}".to_string(),
            images: vec![image_path],
            json_response: true,
        })?;
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert_eq!(payload["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "audit");
        Ok(())
    }

    #[test]
    fn response_extraction() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "{\"overall_score\": "},
                    {"text": "90}"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "AQID"}}
                ]}
            }],
            "usageMetadata": {"totalTokenCount": 321}
        });
        assert_eq!(extract_text(&response), "{\"overall_score\": 90}");
        assert_eq!(usage_tokens(&response), Some(321));
        let image = extract_first_image(&response)?;
        assert_eq!(image, Some((vec![1, 2, 3], "image/jpeg".to_string())));
        assert_eq!(extract_first_image(&json!({}))?, None);
        Ok(())
    }
}
