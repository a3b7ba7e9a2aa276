//! Generation gateway: one provider request per edit operation, and the
//! classification of the returned envelope into an image or a typed failure.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::io::Cursor;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use retouch_contracts::blob::ImageBlob;
use retouch_contracts::hotspot::Hotspot;
use retouch_contracts::session::{EditOperation, PreparedEdit};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::prompts::prompt_for;
use crate::{error_chain_text, non_empty_env, truncate_text};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DRYRUN_FALLBACK_EDGE: u32 = 256;
const TEXT_EXCERPT_CHARS: usize = 240;

/// Model name plus free-form provider options. Numeric options are coerced
/// and clamped when read, so a bad value never reaches the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOptions {
    pub model: String,
    pub provider_options: Map<String, Value>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_IMAGE_MODEL.to_string(),
            provider_options: Map::new(),
        }
    }
}

impl GatewayOptions {
    pub fn new(model: Option<String>, provider_options: Map<String, Value>) -> Self {
        Self {
            model: model
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| non_empty_env("RETOUCH_IMAGE_MODEL"))
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            provider_options,
        }
    }

    pub fn request_timeout_seconds(&self) -> f64 {
        self.numeric(&["request_timeout"], 90.0, 15.0..=300.0)
    }

    pub fn transport_retry_count(&self) -> usize {
        self.numeric(&["transport_retries", "request_retries"], 2.0, 0.0..=4.0)
            .round() as usize
    }

    pub fn retry_backoff_seconds(&self) -> f64 {
        self.numeric(&["retry_backoff"], 1.2, 0.1..=10.0)
    }

    /// First of `keys` present as a number or numeric string, clamped into
    /// `range`; `default` when none parses.
    fn numeric(&self, keys: &[&str], default: f64, range: RangeInclusive<f64>) -> f64 {
        keys.iter()
            .filter_map(|key| self.provider_options.get(*key))
            .find_map(|value| match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(default)
            .clamp(*range.start(), *range.end())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub operation: EditOperation,
    pub prompt: String,
    pub inputs: Vec<ImageBlob>,
    pub options: GatewayOptions,
}

/// A backend that turns a request into a raw `generateContent`-shaped
/// response envelope. Classification happens in the gateway, not here.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<Value>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new());
    providers
}

/// `RETOUCH_PROVIDER` when set, otherwise `gemini` if a key is configured
/// and `dryrun` if not.
pub fn default_provider_name() -> String {
    if let Some(name) = non_empty_env("RETOUCH_PROVIDER") {
        return name.to_ascii_lowercase();
    }
    if GeminiProvider::api_key().is_some() {
        "gemini".to_string()
    } else {
        "dryrun".to_string()
    }
}

/// Why a request produced no image. Every variant names the operation it
/// came from so the message reads naturally on the error banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    Blocked {
        operation: EditOperation,
        reason: String,
        message: Option<String>,
    },
    AbnormalStop {
        operation: EditOperation,
        reason: String,
    },
    NoImage {
        operation: EditOperation,
        text: Option<String>,
    },
    Transport {
        operation: EditOperation,
        detail: String,
    },
}

impl GenerationFailure {
    pub fn operation(&self) -> EditOperation {
        match self {
            Self::Blocked { operation, .. }
            | Self::AbnormalStop { operation, .. }
            | Self::NoImage { operation, .. }
            | Self::Transport { operation, .. } => *operation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::AbnormalStop { .. } => "abnormal_stop",
            Self::NoImage { .. } => "no_image",
            Self::Transport { .. } => "transport",
        }
    }
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.operation().label();
        match self {
            Self::Blocked {
                reason, message, ..
            } => {
                write!(f, "The {label} request was blocked. Reason: {reason}.")?;
                if let Some(message) = message {
                    write!(f, " {message}")?;
                }
                Ok(())
            }
            Self::AbnormalStop { reason, .. } => write!(
                f,
                "Image generation for the {label} stopped unexpectedly. Reason: {reason}. This is often related to safety settings."
            ),
            Self::NoImage { text: Some(text), .. } => write!(
                f,
                "The model did not return an image for the {label}. The model responded with text: \"{}\"",
                truncate_text(text, TEXT_EXCERPT_CHARS)
            ),
            Self::NoImage { text: None, .. } => write!(
                f,
                "The model did not return an image for the {label}. This can happen due to safety filters or if the request is too complex. Please try rephrasing your prompt."
            ),
            Self::Transport { detail, .. } => {
                write!(f, "The {label} request failed: {detail}")
            }
        }
    }
}

impl std::error::Error for GenerationFailure {}

/// One provider round trip: the classified outcome plus the raw envelope.
/// `response` is `None` when the provider never answered.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: Option<Value>,
    pub result: Result<ImageBlob, GenerationFailure>,
}

impl Exchange {
    /// The image, or a [`FailedExchange`] that still carries the envelope.
    pub fn into_result(self) -> Result<ImageBlob> {
        self.result.map_err(|failure| {
            FailedExchange {
                failure,
                response: self.response,
            }
            .into()
        })
    }
}

/// A generation failure travelling through `anyhow` with its envelope
/// attached for the diagnostics log.
#[derive(Debug, Clone)]
pub struct FailedExchange {
    pub failure: GenerationFailure,
    pub response: Option<Value>,
}

impl fmt::Display for FailedExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.failure.fmt(f)
    }
}

impl std::error::Error for FailedExchange {}

/// Sorts a response envelope into exactly one outcome. The checks run in a
/// fixed order: a prompt-level block wins over everything, then the first
/// inline image of the first candidate, then an abnormal finish reason, and
/// finally a text-only answer.
pub fn classify_response(
    operation: EditOperation,
    response: &Value,
    output_name: &str,
) -> Result<ImageBlob, GenerationFailure> {
    let feedback = response
        .get("promptFeedback")
        .or_else(|| response.get("prompt_feedback"));
    if let Some(reason) = feedback
        .and_then(|row| row.get("blockReason").or_else(|| row.get("block_reason")))
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
    {
        let message = feedback
            .and_then(|row| {
                row.get("blockReasonMessage")
                    .or_else(|| row.get("block_reason_message"))
            })
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        return Err(GenerationFailure::Blocked {
            operation,
            reason: reason.to_string(),
            message,
        });
    }

    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let parts = candidate
        .and_then(|row| row.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for part in parts {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str);
        return ImageBlob::from_inline_data(data, mime_type, output_name).map_err(|err| {
            GenerationFailure::Transport {
                operation,
                detail: error_chain_text(&err, 512),
            }
        });
    }

    if let Some(reason) = candidate
        .and_then(|row| row.get("finishReason").or_else(|| row.get("finish_reason")))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty() && *value != "STOP")
    {
        return Err(GenerationFailure::AbnormalStop {
            operation,
            reason: reason.to_string(),
        });
    }

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();
    Err(GenerationFailure::NoImage {
        operation,
        text: (!text.is_empty()).then_some(text),
    })
}

/// Front door for the seven edit operations.
#[derive(Clone)]
pub struct GenerationGateway {
    provider: Arc<dyn ImageProvider>,
    options: GatewayOptions,
}

impl fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish()
    }
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn ImageProvider>, options: GatewayOptions) -> Self {
        Self { provider, options }
    }

    pub fn from_registry(
        registry: &ImageProviderRegistry,
        provider_name: &str,
        options: GatewayOptions,
    ) -> Result<Self> {
        let Some(provider) = registry.get(provider_name) else {
            bail!(
                "unknown image provider '{provider_name}' (available: {})",
                registry.names().join(", ")
            );
        };
        Ok(Self::new(provider, options))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn localized_edit(
        &self,
        image: &ImageBlob,
        instruction: &str,
        hotspot: Hotspot,
    ) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::Localized {
            image: image.clone(),
            prompt: instruction.to_string(),
            hotspot,
        })
    }

    pub fn filter(&self, image: &ImageBlob, instruction: &str) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::Filter {
            image: image.clone(),
            prompt: instruction.to_string(),
        })
    }

    pub fn global_adjustment(
        &self,
        image: &ImageBlob,
        instruction: &str,
    ) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::Adjustment {
            image: image.clone(),
            prompt: instruction.to_string(),
        })
    }

    pub fn composite(
        &self,
        subject: &ImageBlob,
        scene: &ImageBlob,
        style: &ImageBlob,
    ) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::Composite {
            subject: subject.clone(),
            scene: scene.clone(),
            style: style.clone(),
        })
    }

    pub fn extend_backdrop(&self, image: &ImageBlob) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::ExtendBackdrop {
            image: image.clone(),
        })
    }

    pub fn replace_backdrop(
        &self,
        image: &ImageBlob,
        background: &ImageBlob,
    ) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::ReplaceBackdrop {
            image: image.clone(),
            background: background.clone(),
        })
    }

    pub fn enhance_quality(&self, image: &ImageBlob) -> Result<ImageBlob, GenerationFailure> {
        self.execute(&PreparedEdit::Enhance {
            image: image.clone(),
        })
    }

    pub fn request_for(&self, edit: &PreparedEdit) -> GenerationRequest {
        GenerationRequest {
            operation: edit.operation(),
            prompt: prompt_for(edit),
            inputs: edit.inputs().into_iter().cloned().collect(),
            options: self.options.clone(),
        }
    }

    pub fn execute(&self, edit: &PreparedEdit) -> Result<ImageBlob, GenerationFailure> {
        self.exchange(edit).result
    }

    /// Sends one request and classifies the envelope, keeping the envelope
    /// for diagnostics. The image keeps the name of the first input so
    /// exports stay recognisable.
    pub fn exchange(&self, edit: &PreparedEdit) -> Exchange {
        let request = self.request_for(edit);
        let operation = request.operation;
        let output_name = request
            .inputs
            .first()
            .map(|image| image.name().to_string())
            .unwrap_or_default();
        match self.provider.generate(&request) {
            Ok(response) => Exchange {
                result: classify_response(operation, &response, &output_name),
                response: Some(response),
            },
            Err(err) => Exchange {
                response: None,
                result: Err(GenerationFailure::Transport {
                    operation,
                    detail: error_chain_text(&err, 512),
                }),
            },
        }
    }
}

struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        let (width, height) = request
            .inputs
            .first()
            .and_then(|image| image.dimensions().ok())
            .map(|dims| (dims.width as u32, dims.height as u32))
            .filter(|(width, height)| *width > 0 && *height > 0)
            .unwrap_or((DRYRUN_FALLBACK_EDGE, DRYRUN_FALLBACK_EDGE));
        let bytes = dryrun_png(width, height, request)?;
        Ok(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "inlineData": {
                            "mimeType": "image/png",
                            "data": BASE64.encode(bytes),
                        }
                    }]
                },
                "finishReason": "STOP",
            }],
            "modelVersion": format!("dryrun/{}", request.options.model),
        }))
    }
}

fn dryrun_png(width: u32, height: u32, request: &GenerationRequest) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_request(request);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .context("dryrun image encode failed")?;
    Ok(out)
}

fn color_from_request(request: &GenerationRequest) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(request.prompt.as_bytes());
    for image in &request.inputs {
        hasher.update(image.digest().as_bytes());
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn generate_content_url(&self, model: &str) -> String {
        let model = model.trim();
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:generateContent", self.api_base)
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts: Vec<Value> = request
            .inputs
            .iter()
            .map(ImageBlob::to_inline_part)
            .collect();
        parts.push(json!({ "text": request.prompt }));

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": ["IMAGE", "TEXT"] }),
        );
        if let Some(safety_settings) = request
            .options
            .provider_options
            .get("safety_settings")
            .and_then(Value::as_array)
            .cloned()
        {
            payload.insert("safetySettings".to_string(), Value::Array(safety_settings));
        }
        Value::Object(payload)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        options: &GatewayOptions,
    ) -> Result<HttpResponse> {
        let timeout_s = options.request_timeout_seconds();
        let max_retries = options.transport_retry_count();
        let retry_backoff_s = options.retry_backoff_seconds();
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(timeout_s))
                .json(payload)
                .send();
            match sent {
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) && attempt < max_retries => {
                    attempt += 1;
                    thread::sleep(Duration::from_secs_f64(retry_backoff_s * attempt as f64));
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context(format!(
                        "Gemini request to {endpoint} failed after {attempt} retries"
                    )));
                }
            }
        }
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.generate_content_url(&request.options.model);
        let payload = Self::build_payload(request);
        let response =
            self.post_with_transport_retries(&endpoint, &api_key, &payload, &request.options)?;
        read_envelope(response)
    }
}

/// Parses a `generateContent` reply. Non-2xx statuses become errors with a
/// short excerpt of the body.
fn read_envelope(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("failed to read the Gemini response body")?;
    if !status.is_success() {
        bail!(
            "Gemini answered HTTP {}: {}",
            status.as_u16(),
            truncate_text(body.trim(), 512)
        );
    }
    serde_json::from_str(&body).context("Gemini response was not valid JSON")
}

/// Timeouts and connection failures are retried; anything the server
/// answered is not.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
