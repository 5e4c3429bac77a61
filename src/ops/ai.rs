// ============================================================================
// AI OPERATIONS: hosted multimodal model for detection, analysis and edits
// ============================================================================
//
// The model is an external HTTP service. Every call is a single blocking
// request; failures are reported to the caller as `AiError`.

use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::io;
use crate::ops::transform::resize_to;
use crate::settings::AppSettings;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Longest error body kept in `AiError::Status`.
const MAX_ERROR_BODY: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum AiError {
    #[error("no API key configured (set LUMINA_API_KEY or GEMINI_API_KEY)")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Http(String),
    #[error("model returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("model returned no content")]
    EmptyResponse,
    #[error("model returned no image")]
    NoImage,
    #[error("could not parse model reply: {0}")]
    Parse(String),
    #[error("could not decode image: {0}")]
    Decode(String),
}

// ============================================================================
// MODEL BOUNDARY
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    /// PNG-encoded input image.
    pub image_png: Vec<u8>,
    pub instruction: String,
    /// Ask for an image in the reply, not just text.
    pub want_image: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GenerateResponse {
    pub text: Option<String>,
    pub image: Option<RgbaImage>,
}

/// Anything that can answer a multimodal prompt. The GUI and CLI use
/// `GeminiClient`; tests substitute a scripted model.
pub trait GenerativeModel: Send + Sync {
    fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, AiError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct AiConfig {
    pub endpoint: String,
    pub model: String,
    pub image_model: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl AiConfig {
    /// Settings file values, then `LUMINA_AI_ENDPOINT` / `LUMINA_AI_MODEL`
    /// overrides. The key only ever comes from the environment.
    pub fn from_settings(settings: &AppSettings) -> Self {
        let mut config = Self {
            endpoint: settings.ai_endpoint.clone(),
            model: settings.ai_model.clone(),
            image_model: settings.ai_image_model.clone(),
            timeout_secs: settings.ai_timeout_secs,
            api_key: api_key_from_env(),
        };
        if let Ok(endpoint) = std::env::var("LUMINA_AI_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            config.endpoint = endpoint.trim().to_string();
        }
        if let Ok(model) = std::env::var("LUMINA_AI_MODEL")
            && !model.trim().is_empty()
        {
            config.model = model.trim().to_string();
        }
        config
    }
}

/// `LUMINA_API_KEY`, falling back to `GEMINI_API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    ["LUMINA_API_KEY", "GEMINI_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

// ============================================================================
// WIRE FORMAT (generateContent)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Inline { inline_data: InlineData },
    Text { text: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

fn build_request_body(req: &GenerateRequest) -> GenerateContentRequest {
    let modalities = if req.want_image { vec!["TEXT", "IMAGE"] } else { vec!["TEXT"] };
    GenerateContentRequest {
        contents: vec![RequestContent {
            parts: vec![
                RequestPart::Inline {
                    inline_data: InlineData {
                        mime_type: "image/png".to_string(),
                        data: general_purpose::STANDARD.encode(&req.image_png),
                    },
                },
                RequestPart::Text { text: req.instruction.clone() },
            ],
        }],
        generation_config: GenerationConfig { response_modalities: modalities },
    }
}

/// Collects every text part and the first image part of the first candidate.
fn parse_response(resp: GenerateContentResponse) -> Result<GenerateResponse, AiError> {
    let parts = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();
    if parts.is_empty() {
        return Err(AiError::EmptyResponse);
    }

    let mut text = String::new();
    let mut image = None;
    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if image.is_none()
            && let Some(blob) = part.inline_data
        {
            let bytes = general_purpose::STANDARD
                .decode(blob.data.as_bytes())
                .map_err(|e| AiError::Decode(e.to_string()))?;
            let decoded = io::load_image_from_memory(&bytes).map_err(|e| AiError::Decode(e.to_string()))?;
            image = Some(decoded);
        }
    }
    let text = if text.trim().is_empty() { None } else { Some(text) };
    if text.is_none() && image.is_none() {
        return Err(AiError::EmptyResponse);
    }
    Ok(GenerateResponse { text, image })
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

pub struct GeminiClient {
    http: reqwest::blocking::Client,
    config: AiConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let api_key = config.api_key.clone().ok_or(AiError::MissingApiKey)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AiError::Http(e.to_string()))?;
        Ok(Self { http, config, api_key })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }
}

impl GenerativeModel for GeminiClient {
    fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, AiError> {
        let model = if req.want_image { &self.config.image_model } else { &self.config.model };
        let url = format!("{}/models/{}:generateContent", self.config.endpoint.trim_end_matches('/'), model);
        let body = build_request_body(req);

        tracing::info!(%model, want_image = req.want_image, "sending model request");
        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Http(format!("timed out after {}s", self.config.timeout_secs))
                } else {
                    AiError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
                body.truncate(cut);
            }
            tracing::error!(code = status.as_u16(), "model request rejected");
            return Err(AiError::Status { code: status.as_u16(), body });
        }

        let parsed: GenerateContentResponse = response.json().map_err(|e| AiError::Parse(e.to_string()))?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "model reply received");
        parse_response(parsed)
    }
}

// ============================================================================
// SUBJECT BOX
// ============================================================================

/// Rectangle in percent of the image size (all fields 0..=100).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SubjectBox {
    /// Clamps the origin into 0..=100 and the size so the box stays inside.
    pub fn clamped(self) -> Self {
        let fix = |v: f32| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };
        let x = fix(self.x);
        let y = fix(self.y);
        Self {
            x,
            y,
            width: fix(self.width).min(100.0 - x),
            height: fix(self.height).min(100.0 - y),
        }
    }

    /// Pixel rectangle `(x, y, w, h)` on a `width × height` image; never empty.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let b = self.clamped();
        let px = ((b.x / 100.0 * width as f32).round() as u32).min(width.saturating_sub(1));
        let py = ((b.y / 100.0 * height as f32).round() as u32).min(height.saturating_sub(1));
        let pw = ((b.width / 100.0 * width as f32).round() as u32).clamp(1, width.saturating_sub(px).max(1));
        let ph = ((b.height / 100.0 * height as f32).round() as u32).clamp(1, height.saturating_sub(py).max(1));
        (px, py, pw, ph)
    }

    pub fn from_pixels(rect: (u32, u32, u32, u32), width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            x: rect.0 as f32 / w * 100.0,
            y: rect.1 as f32 / h * 100.0,
            width: rect.2 as f32 / w * 100.0,
            height: rect.3 as f32 / h * 100.0,
        }
        .clamped()
    }

    fn describe(&self) -> String {
        format!(
            "the rectangle starting {:.1}% from the left and {:.1}% from the top, {:.1}% wide and {:.1}% tall",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Deserialize)]
struct RawBox {
    x: f32,
    y: f32,
    #[serde(alias = "w")]
    width: f32,
    #[serde(alias = "h")]
    height: f32,
}

/// Pulls the first box-shaped JSON object out of a reply that may be wrapped
/// in markdown fences or prose. Braces in the prose and nested objects are
/// skipped over.
pub fn parse_subject_box(reply: &str) -> Result<SubjectBox, AiError> {
    let mut last_err = None;
    for (start, _) in reply.match_indices('{') {
        let Some(len) = balanced_object_len(&reply[start..]) else {
            continue;
        };
        match serde_json::from_str::<RawBox>(&reply[start..start + len]) {
            Ok(raw) => {
                return Ok(SubjectBox { x: raw.x, y: raw.y, width: raw.width, height: raw.height }.clamped());
            }
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(AiError::Parse(last_err.unwrap_or_else(|| "no JSON object in reply".to_string())))
}

/// Byte length of the `{...}` object at the start of `text`, counting nested
/// braces and ignoring those inside strings.
fn balanced_object_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// HIGH-LEVEL OPERATIONS
// ============================================================================

const DETECT_PROMPT: &str = "Find the main subject of this image. Reply with only a JSON object \
{\"x\": number, \"y\": number, \"width\": number, \"height\": number} giving its bounding box \
as percentages (0-100) of the image width and height, measured from the top-left corner.";

const ENHANCE_PROMPT: &str = "Enhance this photo: correct exposure and white balance, recover \
shadow and highlight detail, and improve clarity. Keep the composition, subject and content \
unchanged. Return the edited image.";

fn request_for(image: &RgbaImage, instruction: String, want_image: bool) -> Result<GenerateRequest, AiError> {
    let image_png = io::encode_png(image).map_err(|e| AiError::Decode(format!("png encode failed: {e}")))?;
    Ok(GenerateRequest { image_png, instruction, want_image })
}

/// Bounding box of the image's main subject.
pub fn detect_subject(model: &dyn GenerativeModel, image: &RgbaImage) -> Result<SubjectBox, AiError> {
    let req = request_for(image, DETECT_PROMPT.to_string(), false)?;
    let reply = model.generate(&req)?;
    let text = reply.text.ok_or(AiError::EmptyResponse)?;
    let subject = parse_subject_box(&text)?;
    tracing::info!(?subject, "subject detected");
    Ok(subject)
}

/// Free-form answer to `question` about the image.
pub fn analyze_image(model: &dyn GenerativeModel, image: &RgbaImage, question: &str) -> Result<String, AiError> {
    let question = if question.trim().is_empty() { "Describe this image." } else { question.trim() };
    let req = request_for(image, question.to_string(), false)?;
    let text = model.generate(&req)?.text.ok_or(AiError::EmptyResponse)?;
    Ok(text.trim().to_string())
}

/// Sends an edit instruction and returns the edited image at the source size.
fn edit_image(model: &dyn GenerativeModel, image: &RgbaImage, instruction: String) -> Result<RgbaImage, AiError> {
    let req = request_for(image, instruction, true)?;
    let edited = model.generate(&req)?.image.ok_or(AiError::NoImage)?;
    Ok(resize_to(&edited, image.width(), image.height()))
}

pub fn remove_object(model: &dyn GenerativeModel, image: &RgbaImage, region: &SubjectBox) -> Result<RgbaImage, AiError> {
    let instruction = format!(
        "Remove the object inside {} and fill the area so it blends seamlessly with the \
         surrounding background. Do not change anything outside that area. Return the edited image.",
        region.clamped().describe()
    );
    edit_image(model, image, instruction)
}

pub fn generative_fill(
    model: &dyn GenerativeModel,
    image: &RgbaImage,
    region: &SubjectBox,
    prompt: &str,
) -> Result<RgbaImage, AiError> {
    let instruction = format!(
        "Inside {}, paint: {}. Match the lighting, perspective and style of the rest of the image. \
         Do not change anything outside that area. Return the edited image.",
        region.clamped().describe(),
        prompt.trim()
    );
    edit_image(model, image, instruction)
}

pub fn auto_enhance(model: &dyn GenerativeModel, image: &RgbaImage) -> Result<RgbaImage, AiError> {
    edit_image(model, image, ENHANCE_PROMPT.to_string())
}
