/// OCR.space client.
///
/// Images go up as a multipart form (`apikey`, `OCREngine`, `file`) and the first
/// parsed result's text comes back. [`OcrSpaceClient::recognize`] keeps provider
/// and transport failures apart; [`OcrSpaceClient::get_ocr_text`] folds every
/// failure into an empty string.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, warn};

use crate::gemini::read_limited_text;

const DEFAULT_API_URL: &str = "https://api.ocr.space/parse/image";

/// OCR.space engine used when the caller does not pick one.
pub const DEFAULT_ENGINE: u8 = 2;

#[derive(Clone, Debug)]
pub struct OcrSpaceConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl OcrSpaceConfig {
    /// Optional:
    /// - `OCR_SPACE_API_KEY` (default: empty, rejected by the provider at call time)
    /// - `OCR_SPACE_API_URL` (default: the public parse/image endpoint)
    /// - `OCR_SPACE_TIMEOUT_SECS` (default: 60)
    pub fn from_env() -> Self {
        let api_url =
            std::env::var("OCR_SPACE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_key = std::env::var("OCR_SPACE_API_KEY").unwrap_or_default();
        let timeout = std::env::var("OCR_SPACE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        Self {
            api_url,
            api_key,
            timeout,
            max_error_body_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("ocr request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ocr provider returned status={status} body={body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid ocr response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("ocr processing error: {0}")]
    Provider(String),
}

/// Image bytes in, recognized text out.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// `Ok("")` means the provider ran but found no text.
    async fn recognize(&self, image: &[u8], engine: u8) -> Result<String, OcrError>;
}

#[derive(Clone)]
pub struct OcrSpaceClient {
    config: OcrSpaceConfig,
    http: reqwest::Client,
}

impl OcrSpaceClient {
    pub fn new(config: OcrSpaceConfig) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder()
            .user_agent("medalert/ocr")
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OcrSpaceConfig {
        &self.config
    }

    /// Recognize text, returning `""` on every failure path.
    pub async fn get_ocr_text(&self, image: &[u8], engine: u8) -> String {
        ocr_text_or_empty(self.recognize(image, engine).await)
    }

    async fn post_image(&self, image: &[u8], engine: u8) -> Result<OcrSpaceResponse, OcrError> {
        let file = Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("apikey", self.config.api_key.clone())
            .text("OCREngine", engine.to_string())
            .part("file", file);

        let resp = self
            .http
            .post(&self.config.api_url)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
            return Err(OcrError::Status { status, body });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TextRecognizer for OcrSpaceClient {
    async fn recognize(&self, image: &[u8], engine: u8) -> Result<String, OcrError> {
        self.post_image(image, engine).await?.into_text()
    }
}

/// Collapse a recognition outcome into plain text, logging failures.
pub fn ocr_text_or_empty(outcome: Result<String, OcrError>) -> String {
    match outcome {
        Ok(text) => text,
        Err(OcrError::Provider(message)) => {
            warn!(message = %message, "ocr.space reported a processing error");
            String::new()
        }
        Err(e) => {
            error!(error = %e, "ocr request failed");
            String::new()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OcrSpaceResponse {
    #[serde(default)]
    pub is_errored_on_processing: bool,
    #[serde(default)]
    pub error_message: Option<ErrorMessage>,
    #[serde(default)]
    pub parsed_results: Option<Vec<ParsedResult>>,
}

/// OCR.space sends `ErrorMessage` either as a string or as a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn joined(&self) -> String {
        match self {
            ErrorMessage::One(s) => s.clone(),
            ErrorMessage::Many(v) => v.join("; "),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParsedResult {
    #[serde(default)]
    pub parsed_text: Option<String>,
}

impl OcrSpaceResponse {
    pub fn into_text(self) -> Result<String, OcrError> {
        if self.is_errored_on_processing {
            let message = self
                .error_message
                .map(|m| m.joined())
                .unwrap_or_else(|| "unknown processing error".to_string());
            return Err(OcrError::Provider(message));
        }
        Ok(self
            .parsed_results
            .and_then(|results| results.into_iter().next())
            .and_then(|r| r.parsed_text)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Multipart, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn test_config(api_url: String) -> OcrSpaceConfig {
        OcrSpaceConfig {
            api_url,
            api_key: "k-123".to_string(),
            timeout: Duration::from_secs(5),
            max_error_body_bytes: 1024,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/parse/image")
    }

    #[test]
    fn test_parse_success_response() {
        let resp: OcrSpaceResponse = serde_json::from_value(json!({
            "ParsedResults": [{"ParsedText": "Ingredients: oats, sugar", "FileParseExitCode": 1}],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false
        }))
        .unwrap();
        assert_eq!(resp.into_text().unwrap(), "Ingredients: oats, sugar");
    }

    #[test]
    fn test_parse_errored_response() {
        let resp: OcrSpaceResponse = serde_json::from_value(json!({
            "IsErroredOnProcessing": true,
            "ErrorMessage": ["File failed validation.", "Unsupported format"]
        }))
        .unwrap();
        match resp.into_text() {
            Err(OcrError::Provider(msg)) => {
                assert_eq!(msg, "File failed validation.; Unsupported format")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_results_is_empty_text() {
        let resp: OcrSpaceResponse =
            serde_json::from_value(json!({"IsErroredOnProcessing": false})).unwrap();
        assert_eq!(resp.into_text().unwrap(), "");
    }

    #[tokio::test]
    async fn test_sends_multipart_form() {
        let router = Router::new().route(
            "/parse/image",
            post(|mut multipart: Multipart| async move {
                let mut fields = serde_json::Map::new();
                while let Some(field) = multipart.next_field().await.unwrap() {
                    let name = field.name().unwrap_or_default().to_string();
                    if name == "file" {
                        let meta = format!(
                            "{}|{}",
                            field.file_name().unwrap_or_default(),
                            field.content_type().unwrap_or_default()
                        );
                        let len = field.bytes().await.unwrap().len();
                        fields.insert(name, json!(format!("{meta}|{len}")));
                    } else {
                        fields.insert(name, json!(field.text().await.unwrap()));
                    }
                }
                Json(json!({
                    "IsErroredOnProcessing": false,
                    "ParsedResults": [{"ParsedText": Value::Object(fields).to_string()}]
                }))
            }),
        );
        let client = OcrSpaceClient::new(test_config(serve(router).await)).unwrap();

        let text = client.get_ocr_text(&[1, 2, 3, 4], 2).await;
        let echoed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(echoed["apikey"], "k-123");
        assert_eq!(echoed["OCREngine"], "2");
        assert_eq!(echoed["file"], "image.jpg|image/jpeg|4");
    }

    #[tokio::test]
    async fn test_processing_error_returns_empty_text() {
        let router = Router::new().route(
            "/parse/image",
            post(|| async {
                Json(json!({"IsErroredOnProcessing": true, "ErrorMessage": "Timed out waiting for results"}))
            }),
        );
        let client = OcrSpaceClient::new(test_config(serve(router).await)).unwrap();

        assert_eq!(client.get_ocr_text(b"jpeg", 2).await, "");
        assert!(matches!(
            client.recognize(b"jpeg", 2).await,
            Err(OcrError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_provider_returns_empty_text() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client =
            OcrSpaceClient::new(test_config(format!("http://{addr}/parse/image"))).unwrap();

        assert_eq!(client.get_ocr_text(b"jpeg", 1).await, "");
        assert!(matches!(
            client.recognize(b"jpeg", 1).await,
            Err(OcrError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let router = Router::new().route(
            "/parse/image",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "The API key is invalid") }),
        );
        let client = OcrSpaceClient::new(test_config(serve(router).await)).unwrap();

        match client.recognize(b"jpeg", 2).await {
            Err(OcrError::Status { status, body }) => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "The API key is invalid");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
