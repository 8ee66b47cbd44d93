use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct GeminiClientConfig {
    pub base_url: String,
    /// Sent as `x-goog-api-key`. An empty key is not rejected here; the provider
    /// answers with an auth error which surfaces on the first call.
    pub api_key: String,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl GeminiClientConfig {
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();

        let default_timeout = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        // Zero by default: the extractor's repair prompt is the only re-ask a scan makes.
        let max_retries = std::env::var("GEMINI_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);

        let initial_backoff = std::env::var("GEMINI_RETRY_INITIAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(200));

        let max_backoff = std::env::var("GEMINI_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(5_000));

        let max_error_body_bytes = std::env::var("GEMINI_MAX_ERROR_BODY_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(8 * 1024);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            max_error_body_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeminiClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },
}

/// A text-in, text-out language model call.
///
/// `Ok(None)` means the provider answered but produced no text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str)
        -> Result<Option<String>, GeminiClientError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiClientConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiClientConfig) -> Result<Self, GeminiClientError> {
        let http = reqwest::Client::builder()
            .user_agent("medalert/gemini")
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GeminiClientConfig {
        &self.config
    }

    /// POST `{base_url}/models/{model}:generateContent` with a single user turn.
    pub async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Option<String>, GeminiClientError> {
        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);
        let request = GenerateContentRequest::user_prompt(prompt);
        let response: Value = self
            .request_with_retry(|| {
                let url = url.clone();
                let req = request.clone();
                async move {
                    let resp = self
                        .http
                        .post(&url)
                        .header("x-goog-api-key", &self.config.api_key)
                        .timeout(self.config.default_timeout)
                        .json(&req)
                        .send()
                        .await?;
                    Self::parse_json_response(resp, self.config.max_error_body_bytes).await
                }
            })
            .await?;
        Ok(response_text(&response))
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, GeminiClientError> {
        if resp.status().is_success() {
            let bytes = resp.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
        Err(Self::to_upstream_error(resp, max_error_body_bytes).await)
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> GeminiClientError {
        let status = resp.status();
        let body = read_limited_text(resp, max_error_body_bytes).await;
        upstream_error(status, body)
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, GeminiClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GeminiClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "gemini request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Option<String>, GeminiClientError> {
        self.generate_content(model, prompt).await
    }
}

/// Pull the reply text out of a `generateContent` response.
///
/// Checked in order: the joined `candidates[0].content.parts[*].text`, then the
/// alternate shapes `output[0].content[0].text` and `candidates[0].content[0].text`.
/// Empty text counts as no text.
pub fn response_text(response: &Value) -> Option<String> {
    let from_parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .filter(|s| !s.is_empty());
    if from_parts.is_some() {
        return from_parts;
    }

    ["/output/0/content/0/text", "/candidates/0/content/0/text"]
        .iter()
        .filter_map(|path| response.pointer(path).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn upstream_error(status: StatusCode, body: String) -> GeminiClientError {
    if let Ok(parsed) = serde_json::from_str::<GoogleErrorEnvelope>(&body) {
        let message = parsed
            .error
            .message
            .or(parsed.error.status)
            .unwrap_or_else(|| "unknown upstream error".to_string());
        return GeminiClientError::Upstream { status, message };
    }
    GeminiClientError::UpstreamBody { status, body }
}

fn should_retry(err: &GeminiClientError) -> bool {
    match err {
        GeminiClientError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        GeminiClientError::Upstream { status, .. }
        | GeminiClientError::UpstreamBody { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        GeminiClientError::InvalidJson(_) => false,
    }
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    Duration::from_millis(capped_ms.saturating_add(pseudo_jitter_ms(jitter_cap)))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

pub(crate) async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorObject,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorObject {
    message: Option<String>,
    status: Option<String>,
    #[allow(dead_code)]
    code: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

impl GenerateContentRequest {
    fn user_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}
