/// MCP server exposing the label scan pipeline.
///
/// Tools:
/// - `ocr_image`: OCR only
/// - `extract_product`: structured product data from label text
/// - `analyze_product`: health analysis of product data against a health profile
/// - `scan_label`: the whole chain for one image
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use medalert_common::analysis::{AnalysisRequest, AnalysisResult};
use medalert_common::ocr_space::{ocr_text_or_empty, DEFAULT_ENGINE};
use medalert_common::pipeline::{ScanPipeline, ScanReport, ScanRequest};
use medalert_common::product::Extraction;

use crate::error::AppError;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct MedalertServer {
    pipeline: Arc<ScanPipeline>,
    limiter: Option<RateLimiter>,
    tool_router: ToolRouter<MedalertServer>,
}

impl MedalertServer {
    pub fn new(pipeline: Arc<ScanPipeline>, limiter: Option<RateLimiter>) -> Self {
        Self {
            pipeline,
            limiter,
            tool_router: Self::tool_router(),
        }
    }

    async fn gate(&self) -> Result<(), String> {
        if let Some(limiter) = &self.limiter {
            limiter.check().await?;
        }
        Ok(())
    }
}

/// Accepts plain base64 or a `data:image/...;base64,` URL.
fn decode_base64_image(raw: &str) -> Result<Vec<u8>, AppError> {
    let payload = match raw.trim().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| AppError::InvalidImage("data URL has no payload".to_string()))?,
        None => raw.trim(),
    };
    STANDARD
        .decode(payload)
        .map_err(|e| AppError::InvalidImage(format!("image_base64 is not valid base64: {e}")))
}

async fn load_image(
    image_base64: Option<&str>,
    image_path: Option<&str>,
) -> Result<Vec<u8>, AppError> {
    let bytes = match (image_base64, image_path) {
        (Some(b64), None) => decode_base64_image(b64)?,
        (None, Some(path)) => tokio::fs::read(path)
            .await
            .map_err(|e| AppError::InvalidImage(format!("failed to read {path}: {e}")))?,
        _ => {
            return Err(AppError::InvalidImage(
                "provide exactly one of image_base64 or image_path".to_string(),
            ))
        }
    };
    if bytes.is_empty() {
        return Err(AppError::InvalidImage("image is empty".to_string()));
    }
    Ok(bytes)
}

fn resolve_engine(engine: Option<u8>) -> Result<u8, AppError> {
    match engine.unwrap_or(DEFAULT_ENGINE) {
        e @ 1..=3 => Ok(e),
        other => Err(AppError::InvalidEngine(other)),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OcrImageParams {
    /// Image bytes as standard base64 (a data URL is also accepted).
    image_base64: Option<String>,
    /// Path to an image file readable by the server.
    image_path: Option<String>,
    /// OCR.space engine: 1, 2 or 3 (default: 2).
    engine: Option<u8>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractProductParams {
    /// Label text, usually OCR output.
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalyzeProductParams {
    /// Structured product data or raw OCR output.
    ocr_result: Option<Value>,
    /// Free-text notes from the user.
    user_notes: Option<String>,
    /// The user's health profile (age, conditions, preferences, ...).
    health_profile: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ScanLabelParams {
    /// Image bytes as standard base64 (a data URL is also accepted).
    image_base64: Option<String>,
    /// Path to an image file readable by the server.
    image_path: Option<String>,
    /// OCR.space engine: 1, 2 or 3 (default: 2).
    engine: Option<u8>,
    user_notes: Option<String>,
    health_profile: Option<Value>,
}

#[derive(Debug, Serialize, JsonSchema)]
struct OcrTextResponse {
    /// Recognized text; empty when nothing was found or OCR failed.
    text: String,
    /// Present only when OCR failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
struct ExtractProductResponse {
    /// Null for blank text.
    result: Option<Extraction>,
}

#[tool_router]
impl MedalertServer {
    #[tool(description = "Run OCR on a product label image (OCR.space). Returns the recognized text; `error` is set when OCR failed rather than finding no text.")]
    async fn ocr_image(
        &self,
        Parameters(params): Parameters<OcrImageParams>,
    ) -> Result<Json<OcrTextResponse>, String> {
        let engine = resolve_engine(params.engine).map_err(|e| e.to_string())?;
        let image = load_image(params.image_base64.as_deref(), params.image_path.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        self.gate().await?;

        let outcome = self.pipeline.recognize(&image, engine).await;
        let error = outcome.as_ref().err().map(|e| e.to_string());
        Ok(Json(OcrTextResponse {
            text: ocr_text_or_empty(outcome),
            error,
        }))
    }

    #[tool(description = "Extract product name, description, ingredients, sources and a 0-100 confidence from label text. Returns null for blank text and an object with `error` when the model output could not be used.")]
    async fn extract_product(
        &self,
        Parameters(params): Parameters<ExtractProductParams>,
    ) -> Result<Json<ExtractProductResponse>, String> {
        if params.text.trim().is_empty() {
            return Ok(Json(ExtractProductResponse { result: None }));
        }
        self.gate().await?;
        let result = self.pipeline.extractor().extract_structured_data(&params.text).await;
        Ok(Json(ExtractProductResponse { result }))
    }

    #[tool(description = "Analyze product data against a user's health profile. Always returns usefulIngredients, harmfulIngredients, consumptionGuidelines, foodSuggestions and summary; `error` is set when the model could not be reached.")]
    async fn analyze_product(
        &self,
        Parameters(params): Parameters<AnalyzeProductParams>,
    ) -> Result<Json<AnalysisResult>, String> {
        self.gate().await?;
        let request = AnalysisRequest {
            ocr_result: params.ocr_result,
            user_notes: params.user_notes,
            health_snapshot: params.health_profile,
        };
        Ok(Json(self.pipeline.analyzer().run_llm_analysis(&request).await))
    }

    #[tool(description = "Scan a product label image end to end: OCR, structured extraction, then personalized health analysis against the given health profile.")]
    async fn scan_label(
        &self,
        Parameters(params): Parameters<ScanLabelParams>,
    ) -> Result<Json<ScanReport>, String> {
        let engine = resolve_engine(params.engine).map_err(|e| e.to_string())?;
        let image = load_image(params.image_base64.as_deref(), params.image_path.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        self.gate().await?;

        let report = self
            .pipeline
            .scan(ScanRequest {
                image,
                engine,
                user_notes: params.user_notes,
                health_profile: params.health_profile,
            })
            .await;
        Ok(Json(report))
    }
}

#[tool_handler]
impl ServerHandler for MedalertServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "medalert".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Food and supplement label scanner. Use scan_label with an image and the user's \
health profile for the full flow, or ocr_image/extract_product/analyze_product to run single \
stages. Results always carry every field; check `error` fields to detect failures."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medalert_common::cache::ScanCache;
    use medalert_common::gemini::{GeminiClientError, TextGenerator};
    use medalert_common::ocr_space::{OcrError, TextRecognizer};
    use medalert_common::pipeline::PipelineConfig;
    use medalert_common::redis::RedisCache;

    struct CannedRecognizer;

    #[async_trait]
    impl TextRecognizer for CannedRecognizer {
        async fn recognize(&self, image: &[u8], _engine: u8) -> Result<String, OcrError> {
            if image == b"unreadable" {
                return Err(OcrError::Provider("Unable to recognize the file type".to_string()));
            }
            Ok("MINT GUM\nIngredients: xylitol, mint".to_string())
        }
    }

    /// Returns a product record for extraction prompts and an analysis otherwise.
    struct CannedGenerator;

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(
            &self,
            _model: &str,
            prompt: &str,
        ) -> Result<Option<String>, GeminiClientError> {
            let reply = if prompt.contains("TEXT IN IMAGE") {
                r#"{"productName":"Mint Gum","ingredients":["xylitol","mint"],"confidence":80}"#
            } else {
                r#"{"usefulIngredients":[{"name":"Xylitol","rationale":"Low glycemic"}],"summary":"Suitable for you."}"#
            };
            Ok(Some(reply.to_string()))
        }
    }

    fn server() -> MedalertServer {
        let pipeline = ScanPipeline::new(
            Arc::new(CannedRecognizer),
            Arc::new(CannedGenerator),
            PipelineConfig::default(),
            ScanCache::new(RedisCache::disabled(), 60),
        );
        MedalertServer::new(Arc::new(pipeline), None)
    }

    #[test]
    fn tools_publish_output_schemas() {
        let tools = MedalertServer::tool_router().list_all();
        for name in ["ocr_image", "extract_product", "analyze_product", "scan_label"] {
            let tool = tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing tool: {name}"));
            assert!(
                tool.output_schema.is_some(),
                "tool {name} should publish output_schema"
            );
        }
    }

    #[test]
    fn test_decode_base64_image() {
        assert_eq!(decode_base64_image("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64_image("data:image/jpeg;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(decode_base64_image("not base64!").is_err());
        assert!(decode_base64_image("data:image/jpeg;base64").is_err());
    }

    #[test]
    fn test_resolve_engine() {
        assert_eq!(resolve_engine(None).unwrap(), 2);
        assert_eq!(resolve_engine(Some(1)).unwrap(), 1);
        assert!(matches!(resolve_engine(Some(0)), Err(AppError::InvalidEngine(0))));
        assert!(matches!(resolve_engine(Some(4)), Err(AppError::InvalidEngine(4))));
    }

    #[tokio::test]
    async fn test_load_image_requires_exactly_one_source() {
        assert!(load_image(None, None).await.is_err());
        assert!(load_image(Some("aGk="), Some("/tmp/x.jpg")).await.is_err());
        assert!(load_image(Some(""), None).await.is_err());
        assert_eq!(load_image(Some("aGk="), None).await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_ocr_image_reports_failure_separately() {
        let server = server();
        let ok = server
            .ocr_image(Parameters(OcrImageParams {
                image_base64: Some(STANDARD.encode(b"jpeg")),
                image_path: None,
                engine: None,
            }))
            .await
            .unwrap();
        assert!(ok.0.text.starts_with("MINT GUM"));
        assert!(ok.0.error.is_none());

        let failed = server
            .ocr_image(Parameters(OcrImageParams {
                image_base64: Some(STANDARD.encode(b"unreadable")),
                image_path: None,
                engine: Some(1),
            }))
            .await
            .unwrap();
        assert_eq!(failed.0.text, "");
        assert!(failed.0.error.unwrap().contains("Unable to recognize"));
    }

    #[tokio::test]
    async fn test_extract_product_blank_text_is_null() {
        let out = server()
            .extract_product(Parameters(ExtractProductParams {
                text: "   ".to_string(),
            }))
            .await
            .unwrap();
        assert!(out.0.result.is_none());
    }

    #[tokio::test]
    async fn test_scan_label_end_to_end() {
        let out = server()
            .scan_label(Parameters(ScanLabelParams {
                image_base64: Some(STANDARD.encode(b"jpeg")),
                image_path: None,
                engine: None,
                user_notes: Some("I chew gum daily".to_string()),
                health_profile: Some(serde_json::json!({"conditions": ["prediabetes"]})),
            }))
            .await
            .unwrap();
        let report = out.0;
        let product = report.product.as_ref().and_then(Extraction::product).unwrap();
        assert_eq!(product.product_name.as_deref(), Some("Mint Gum"));
        assert_eq!(report.analysis.summary, "Suitable for you.");
        assert_eq!(report.analysis.useful_ingredients[0].name, "Xylitol");
    }

    #[tokio::test]
    async fn test_rate_limited_tool_is_rejected() {
        let mut server = server();
        server.limiter = Some(RateLimiter::new(1));
        let params = || {
            Parameters(AnalyzeProductParams {
                ocr_result: None,
                user_notes: None,
                health_profile: None,
            })
        };
        assert!(server.analyze_product(params()).await.is_ok());
        let Err(err) = server.analyze_product(params()).await else {
            panic!("second call within the same second should be rejected");
        };
        assert!(err.contains("rate limit"));
    }
}
