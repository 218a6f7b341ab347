use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use inkframe_contracts::{ComicError, ProviderError};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::{EngineKind, PipelineConfig};

pub const IMAGE_SIZE: u32 = 1024;
pub const NEGATIVE_PROMPT: &str = "speech bubble, caption, subtitle, text, watermark";

const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
const REPLICATE_SDXL_VERSION: &str =
    "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
const REPLICATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENAI_IMAGE_MODEL: &str = "dall-e-3";
const HF_API_BASE: &str = "https://api-inference.huggingface.co";
const HF_SDXL_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

/// Generation parameters shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleHints {
    pub width: u32,
    pub height: u32,
    pub guidance_scale: f64,
    pub inference_steps: u32,
    pub negative_prompt: String,
}

impl Default for StyleHints {
    fn default() -> Self {
        Self {
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
            guidance_scale: 7.5,
            inference_steps: 30,
            negative_prompt: NEGATIVE_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// One image per call, or a `ProviderError`.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend draws the dialogue bubble itself when asked to in the prompt.
    fn renders_dialogue(&self) -> bool {
        false
    }

    fn synthesize(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes, ProviderError>;
}

/// Provider resolved for a pipeline, decided once at construction.
pub enum ProviderSlot {
    Ready(Box<dyn ImageProvider>),
    Unavailable(String),
}

impl ProviderSlot {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Ready(provider) => Some(provider.name()),
            Self::Unavailable(_) => None,
        }
    }
}

pub fn provider_for(config: &PipelineConfig) -> Result<ProviderSlot, ComicError> {
    if config.engine == EngineKind::Placeholder {
        return Ok(ProviderSlot::Unavailable(
            "rendering engine is 'placeholder'".to_string(),
        ));
    }
    let Some(credential) = config.engine_credential().map(str::to_string) else {
        return Ok(ProviderSlot::Unavailable(format!(
            "credentials for '{}' are not configured",
            config.engine
        )));
    };
    let http = HttpClient::builder()
        .timeout(config.provider_timeout)
        .build()
        .map_err(|err| ComicError::Configuration(format!("HTTP client setup failed: {err}")))?;
    let bases = &config.api_bases;
    let provider: Box<dyn ImageProvider> = match config.engine {
        EngineKind::Placeholder => {
            return Ok(ProviderSlot::Unavailable(
                "rendering engine is 'placeholder'".to_string(),
            ))
        }
        EngineKind::Replicate => Box::new(ReplicateProvider {
            api_base: api_base(bases.replicate.as_deref(), REPLICATE_API_BASE),
            api_token: credential,
            poll_timeout: config.poll_timeout,
            http,
        }),
        EngineKind::OpenAi => Box::new(OpenAiProvider {
            api_base: api_base(bases.openai.as_deref(), OPENAI_API_BASE),
            api_key: credential,
            http,
        }),
        EngineKind::HuggingFace => Box::new(HuggingFaceProvider {
            api_base: api_base(bases.huggingface.as_deref(), HF_API_BASE),
            api_token: credential,
            http,
        }),
    };
    Ok(ProviderSlot::Ready(provider))
}

/// Job submission: create a prediction, poll until it yields an output URL, fetch it.
pub struct ReplicateProvider {
    api_base: String,
    api_token: String,
    poll_timeout: Duration,
    http: HttpClient,
}

impl ReplicateProvider {
    fn prediction_payload(prompt: &str, hints: &StyleHints) -> Value {
        json!({
            "version": REPLICATE_SDXL_VERSION,
            "input": {
                "prompt": prompt,
                "negative_prompt": hints.negative_prompt,
                "width": hints.width,
                "height": hints.height,
                "num_outputs": 1,
                "guidance_scale": hints.guidance_scale,
                "num_inference_steps": hints.inference_steps,
            }
        })
    }

    fn status(prediction: &Value) -> String {
        prediction
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn poll_prediction(&self, poll_url: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
            let payload = response_json_or_error("Replicate poll", response)?;
            let status = Self::status(&payload);
            if status == "succeeded" {
                return Ok(payload);
            }
            if matches!(status.as_str(), "failed" | "canceled") {
                let detail = payload.get("error").cloned().unwrap_or(Value::Null);
                bail!("Replicate prediction {status}: {detail}");
            }
            if started.elapsed() >= self.poll_timeout {
                bail!(
                    "Replicate polling timed out after {:.1}s",
                    self.poll_timeout.as_secs_f64()
                );
            }
            thread::sleep(REPLICATE_POLL_INTERVAL);
        }
    }

    fn first_output_url(value: &Value) -> Option<String> {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                trimmed.starts_with("http").then(|| trimmed.to_string())
            }
            Value::Array(rows) => rows.iter().find_map(Self::first_output_url),
            Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("output"))
                .and_then(Self::first_output_url),
            _ => None,
        }
    }

    fn run(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes> {
        let endpoint = format!("{}/predictions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .json(&Self::prediction_payload(prompt, hints))
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let mut prediction = response_json_or_error("Replicate", response)?;
        let status = Self::status(&prediction);
        if status != "succeeded" {
            if !matches!(status.as_str(), "starting" | "processing") {
                bail!("Replicate prediction failed with status '{status}'");
            }
            let poll_url = prediction
                .get("urls")
                .and_then(|urls| urls.get("get"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("Replicate prediction missing poll URL"))?
                .to_string();
            prediction = self.poll_prediction(&poll_url)?;
        }

        let url = prediction
            .get("output")
            .and_then(Self::first_output_url)
            .ok_or_else(|| anyhow!("Replicate response returned no image URLs"))?;
        download_image(&self.http, "Replicate", &url)
    }
}

impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    fn synthesize(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes, ProviderError> {
        self.run(prompt, hints)
            .map_err(|err| ProviderError::from_chain(self.name(), &err))
    }
}

/// Single call: one images request that answers with a URL (or inline base64).
pub struct OpenAiProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiProvider {
    fn payload(prompt: &str, hints: &StyleHints) -> Value {
        json!({
            "model": OPENAI_IMAGE_MODEL,
            "prompt": prompt,
            "size": format!("{}x{}", hints.width, hints.height),
            "quality": "standard",
            "n": 1,
        })
    }

    fn first_image(&self, payload: &Value) -> Result<ImageBytes> {
        let item = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .ok_or_else(|| anyhow!("OpenAI response returned no images"))?;
        if let Some(encoded) = item
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("OpenAI image base64 decode failed")?;
            return Ok(ImageBytes {
                bytes,
                mime_type: Some("image/png".to_string()),
            });
        }
        let url = item
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("OpenAI image item has neither url nor b64_json"))?;
        download_image(&self.http, "OpenAI", url)
    }

    fn run(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&Self::payload(prompt, hints))
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let payload = response_json_or_error("OpenAI", response)?;
        self.first_image(&payload)
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn renders_dialogue(&self) -> bool {
        true
    }

    fn synthesize(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes, ProviderError> {
        self.run(prompt, hints)
            .map_err(|err| ProviderError::from_chain(self.name(), &err))
    }
}

/// Raw inference: the successful response body is the image itself.
pub struct HuggingFaceProvider {
    api_base: String,
    api_token: String,
    http: HttpClient,
}

impl HuggingFaceProvider {
    fn payload(prompt: &str, hints: &StyleHints) -> Value {
        json!({
            "inputs": prompt,
            "parameters": {
                "negative_prompt": hints.negative_prompt,
                "width": hints.width,
                "height": hints.height,
                "guidance_scale": hints.guidance_scale,
                "num_inference_steps": hints.inference_steps,
            }
        })
    }

    fn run(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes> {
        let endpoint = format!("{}/models/{HF_SDXL_MODEL}", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .json(&Self::payload(prompt, hints))
            .send()
            .with_context(|| format!("Hugging Face request failed ({endpoint})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "Hugging Face API error ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        read_image_body("Hugging Face", response)
    }
}

impl ImageProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn synthesize(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes, ProviderError> {
        self.run(prompt, hints)
            .map_err(|err| ProviderError::from_chain(self.name(), &err))
    }
}

pub(crate) fn api_base(configured: Option<&str>, default: &str) -> String {
    configured
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn download_image(http: &HttpClient, provider: &str, url: &str) -> Result<ImageBytes> {
    let response = http
        .get(url)
        .send()
        .with_context(|| format!("failed downloading {provider} image ({url})"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} image download failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        );
    }
    read_image_body(provider, response)
}

fn read_image_body(provider: &str, response: HttpResponse) -> Result<ImageBytes> {
    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase);
    if mime_type
        .as_deref()
        .map(|mime| mime.starts_with("application/json") || mime.starts_with("text/"))
        .unwrap_or(false)
    {
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} returned a non-image payload: {}",
            truncate_text(&body, 512)
        );
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading {provider} image bytes"))?
        .to_vec();
    if bytes.is_empty() {
        bail!("{provider} returned an empty image payload");
    }
    Ok(ImageBytes { bytes, mime_type })
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};

    use inkframe_contracts::PanelMode;
    use serde_json::json;

    use super::*;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nstub";

    struct Reply {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    }

    impl Reply {
        fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
            Self {
                status,
                content_type,
                body: body.into(),
            }
        }

        fn json(status: u16, body: Value) -> Self {
            Self::new(status, "application/json", body.to_string())
        }

        fn write_to(&self, stream: &mut TcpStream) -> std::io::Result<()> {
            write!(stream, "HTTP/1.1 {} STUB\r\n", self.status)?;
            write!(stream, "Content-Type: {}\r\n", self.content_type)?;
            write!(stream, "Content-Length: {}\r\n", self.body.len())?;
            stream.write_all(b"Connection: close\r\n\r\n")?;
            stream.write_all(&self.body)
        }
    }

    /// Reads one HTTP/1.1 request off `stream` and returns its request line.
    fn read_request(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).expect("request line");
        let mut content_length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).expect("request header");
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).expect("request body");
        request_line.trim_end().to_string()
    }

    /// Loopback server answering one connection per reply, in order. The join handle
    /// yields the request lines it saw.
    fn serve<F>(replies: F) -> (String, thread::JoinHandle<Vec<String>>)
    where
        F: FnOnce(&str) -> Vec<Reply>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let replies = replies(&base);
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for reply in replies {
                let (mut stream, _) = listener.accept().expect("accept");
                seen.push(read_request(&stream));
                reply.write_to(&mut stream).expect("write reply");
            }
            seen
        });
        (base, handle)
    }

    fn http() -> HttpClient {
        HttpClient::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("http client")
    }

    fn huggingface(api_base: String) -> HuggingFaceProvider {
        HuggingFaceProvider {
            api_base,
            api_token: "hf-test".to_string(),
            http: http(),
        }
    }

    fn replicate(api_base: String, poll_timeout: Duration) -> ReplicateProvider {
        ReplicateProvider {
            api_base,
            api_token: "r8-test".to_string(),
            poll_timeout,
            http: http(),
        }
    }

    #[test]
    fn replicate_payload_pins_generation_parameters() {
        let payload = ReplicateProvider::prediction_payload("a ruin", &StyleHints::default());
        assert_eq!(payload["version"], json!(REPLICATE_SDXL_VERSION));
        assert_eq!(payload["input"]["width"], json!(1024));
        assert_eq!(payload["input"]["height"], json!(1024));
        assert_eq!(payload["input"]["guidance_scale"], json!(7.5));
        assert_eq!(payload["input"]["num_inference_steps"], json!(30));
        assert_eq!(payload["input"]["negative_prompt"], json!(NEGATIVE_PROMPT));
    }

    #[test]
    fn replicate_output_url_extraction_handles_nested_shapes() {
        assert_eq!(
            ReplicateProvider::first_output_url(&json!(["https://a/1.png", "https://b/2.png"])),
            Some("https://a/1.png".to_string())
        );
        assert_eq!(
            ReplicateProvider::first_output_url(&json!({"url": " https://cdn/c.png "})),
            Some("https://cdn/c.png".to_string())
        );
        assert_eq!(ReplicateProvider::first_output_url(&json!([])), None);
        assert_eq!(
            ReplicateProvider::first_output_url(&json!("not-a-url")),
            None
        );
    }

    #[test]
    fn openai_payload_requests_one_square_image() {
        let payload = OpenAiProvider::payload("prompt", &StyleHints::default());
        assert_eq!(payload["model"], json!("dall-e-3"));
        assert_eq!(payload["size"], json!("1024x1024"));
        assert_eq!(payload["n"], json!(1));
    }

    #[test]
    fn huggingface_payload_nests_parameters() {
        let payload = HuggingFaceProvider::payload("prompt", &StyleHints::default());
        assert_eq!(payload["inputs"], json!("prompt"));
        assert_eq!(payload["parameters"]["num_inference_steps"], json!(30));
    }

    #[test]
    fn placeholder_engine_yields_unavailable_slot() -> anyhow::Result<()> {
        let config = PipelineConfig::new(EngineKind::Placeholder, PanelMode::Preview, "/tmp/x");
        let slot = provider_for(&config)?;
        assert!(matches!(slot, ProviderSlot::Unavailable(_)));
        assert_eq!(slot.name(), None);
        Ok(())
    }

    #[test]
    fn missing_credentials_yield_unavailable_slot() -> anyhow::Result<()> {
        let config = PipelineConfig::new(EngineKind::Replicate, PanelMode::Preview, "/tmp/x");
        match provider_for(&config)? {
            ProviderSlot::Unavailable(reason) => {
                assert!(reason.contains("replicate"), "unexpected reason: {reason}")
            }
            ProviderSlot::Ready(_) => panic!("provider should not be built without a token"),
        }
        Ok(())
    }

    #[test]
    fn configured_engine_builds_matching_provider() -> anyhow::Result<()> {
        let mut config = PipelineConfig::new(EngineKind::OpenAi, PanelMode::Preview, "/tmp/x");
        config.credentials.openai_key = Some("sk-test".to_string());
        let slot = provider_for(&config)?;
        assert_eq!(slot.name(), Some("openai"));
        if let ProviderSlot::Ready(provider) = slot {
            assert!(provider.renders_dialogue());
        }
        Ok(())
    }

    #[test]
    fn api_base_override_trims_trailing_slash() {
        assert_eq!(
            api_base(Some("http://localhost:9/v1/"), "x"),
            "http://localhost:9/v1"
        );
        assert_eq!(api_base(Some("  "), "fallback"), "fallback");
        assert_eq!(api_base(None, "fallback"), "fallback");
    }

    #[test]
    fn huggingface_error_status_carries_code_and_body() {
        let (base, server) = serve(|_| vec![Reply::json(503, json!({"error": "Model loading"}))]);
        let err = huggingface(base)
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert_eq!(err.provider, "huggingface");
        assert!(err.reason.starts_with("Hugging Face API error (503): "));
        assert!(err.reason.contains("Model loading"));
        let seen = server.join().expect("server thread");
        assert_eq!(seen, vec![format!("POST /models/{HF_SDXL_MODEL} HTTP/1.1")]);
    }

    #[test]
    fn huggingface_empty_success_body_is_rejected() {
        let (base, server) = serve(|_| vec![Reply::new(200, "image/png", Vec::new())]);
        let err = huggingface(base)
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert_eq!(err.reason, "Hugging Face returned an empty image payload");
        server.join().expect("server thread");
    }

    #[test]
    fn huggingface_json_success_body_is_rejected() {
        let (base, server) = serve(|_| vec![Reply::json(200, json!({}))]);
        let err = huggingface(base)
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert_eq!(err.reason, "Hugging Face returned a non-image payload: {}");
        server.join().expect("server thread");
    }

    #[test]
    fn huggingface_image_body_is_returned_with_its_mime_type() {
        let (base, server) = serve(|_| vec![Reply::new(200, "image/png", PNG_BYTES)]);
        let image = huggingface(base)
            .synthesize("a lighthouse", &StyleHints::default())
            .expect("image bytes");
        assert_eq!(image.bytes, PNG_BYTES);
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
        server.join().expect("server thread");
    }

    #[test]
    fn replicate_failed_prediction_after_polling_is_a_provider_error() {
        let (base, server) = serve(|base| {
            let poll = format!("{base}/predictions/p1");
            vec![
                Reply::json(201, json!({"status": "starting", "urls": {"get": poll}})),
                Reply::json(
                    200,
                    json!({"status": "failed", "error": "NSFW content detected"}),
                ),
            ]
        });
        let err = replicate(base, Duration::from_secs(30))
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert_eq!(err.provider, "replicate");
        assert!(err.reason.starts_with("Replicate prediction failed: "));
        assert!(err.reason.contains("NSFW content detected"));
        let seen = server.join().expect("server thread");
        assert_eq!(
            seen,
            vec!["POST /predictions HTTP/1.1", "GET /predictions/p1 HTTP/1.1"]
        );
    }

    #[test]
    fn replicate_polling_stops_at_the_timeout() {
        let (base, server) = serve(|base| {
            let poll = format!("{base}/predictions/p2");
            vec![
                Reply::json(201, json!({"status": "processing", "urls": {"get": poll}})),
                Reply::json(200, json!({"status": "processing"})),
            ]
        });
        let err = replicate(base, Duration::ZERO)
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert!(err.reason.contains("Replicate polling timed out"));
        server.join().expect("server thread");
    }

    #[test]
    fn replicate_rejected_submission_reports_status() {
        let (base, server) = serve(|_| vec![Reply::json(401, json!({"detail": "Invalid token"}))]);
        let err = replicate(base, Duration::from_secs(30))
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert!(err.reason.starts_with("Replicate request failed (401): "));
        assert!(err.reason.contains("Invalid token"));
        server.join().expect("server thread");
    }

    #[test]
    fn replicate_success_downloads_the_output_image() {
        let (base, server) = serve(|base| {
            let output = format!("{base}/out.png");
            vec![
                Reply::json(200, json!({"status": "succeeded", "output": [output]})),
                Reply::new(200, "image/png", PNG_BYTES),
            ]
        });
        let image = replicate(base, Duration::from_secs(30))
            .synthesize("a lighthouse", &StyleHints::default())
            .expect("image bytes");
        assert_eq!(image.bytes, PNG_BYTES);
        let seen = server.join().expect("server thread");
        assert_eq!(seen[1], "GET /out.png HTTP/1.1");
    }

    #[test]
    fn failed_image_download_reports_status() {
        let (base, server) = serve(|base| {
            let output = format!("{base}/gone.png");
            vec![
                Reply::json(200, json!({"status": "succeeded", "output": output})),
                Reply::new(404, "text/plain", "expired"),
            ]
        });
        let err = replicate(base, Duration::from_secs(30))
            .synthesize("a lighthouse", &StyleHints::default())
            .unwrap_err();
        assert_eq!(err.reason, "Replicate image download failed (404): expired");
        server.join().expect("server thread");
    }
}
