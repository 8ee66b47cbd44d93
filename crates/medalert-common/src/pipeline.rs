/// Scan orchestration: OCR, then structured extraction, then health analysis.
///
/// Calls run strictly in sequence. A scan always yields a [`ScanReport`] with an
/// analysis, even when OCR or extraction fail.
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::analysis::{AnalysisRequest, AnalysisResult, HealthAnalyzer, DEFAULT_ANALYSIS_MODEL};
use crate::cache::ScanCache;
use crate::error::CommonError;
use crate::gemini::{GeminiClient, GeminiClientConfig, TextGenerator};
use crate::ocr_space::{
    ocr_text_or_empty, OcrError, OcrSpaceClient, OcrSpaceConfig, TextRecognizer,
};
use crate::product::{Extraction, StructuredExtractor, DEFAULT_EXTRACTION_MODEL};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub extraction_model: String,
    pub analysis_model: String,
}

impl PipelineConfig {
    /// Optional:
    /// - `MEDALERT_EXTRACTION_MODEL` (default: "gemini-2.5-flash")
    /// - `MEDALERT_ANALYSIS_MODEL` (default: "gemini-2.0-flash")
    pub fn from_env() -> Self {
        Self {
            extraction_model: std::env::var("MEDALERT_EXTRACTION_MODEL")
                .unwrap_or_else(|_| DEFAULT_EXTRACTION_MODEL.to_string()),
            analysis_model: std::env::var("MEDALERT_ANALYSIS_MODEL")
                .unwrap_or_else(|_| DEFAULT_ANALYSIS_MODEL.to_string()),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_model: DEFAULT_EXTRACTION_MODEL.to_string(),
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub image: Vec<u8>,
    pub engine: u8,
    pub user_notes: Option<String>,
    pub health_profile: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub ocr_text: String,
    /// Set when OCR failed, as opposed to finding no text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_error: Option<String>,
    /// Null when OCR produced no text.
    pub product: Option<Extraction>,
    pub analysis: AnalysisResult,
}

pub struct ScanPipeline {
    recognizer: Arc<dyn TextRecognizer>,
    extractor: StructuredExtractor,
    analyzer: HealthAnalyzer,
    cache: ScanCache,
}

impl ScanPipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        generator: Arc<dyn TextGenerator>,
        config: PipelineConfig,
        cache: ScanCache,
    ) -> Self {
        Self {
            recognizer,
            extractor: StructuredExtractor::new(Arc::clone(&generator), config.extraction_model),
            analyzer: HealthAnalyzer::new(generator, config.analysis_model),
            cache,
        }
    }

    /// Build the OCR.space and Gemini clients once and wire them into a pipeline.
    pub fn from_configs(
        ocr: OcrSpaceConfig,
        gemini: GeminiClientConfig,
        config: PipelineConfig,
        cache: ScanCache,
    ) -> Result<Self, CommonError> {
        let ocr = OcrSpaceClient::new(ocr)?;
        let gemini = GeminiClient::new(gemini)?;
        Ok(Self::new(Arc::new(ocr), Arc::new(gemini), config, cache))
    }

    pub fn extractor(&self) -> &StructuredExtractor {
        &self.extractor
    }

    pub fn analyzer(&self) -> &HealthAnalyzer {
        &self.analyzer
    }

    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    /// OCR with the cache in front. Failures are not cached.
    pub async fn recognize(&self, image: &[u8], engine: u8) -> Result<String, OcrError> {
        if let Some(text) = self.cache.get_ocr_text(image, engine).await {
            return Ok(text);
        }
        let text = self.recognizer.recognize(image, engine).await?;
        self.cache.set_ocr_text(image, engine, &text).await;
        Ok(text)
    }

    /// OCR text, or `""` on any failure.
    pub async fn get_ocr_text(&self, image: &[u8], engine: u8) -> String {
        ocr_text_or_empty(self.recognize(image, engine).await)
    }

    pub async fn scan(&self, request: ScanRequest) -> ScanReport {
        let (ocr_text, ocr_error) = match self.recognize(&request.image, request.engine).await {
            Ok(text) => (text, None),
            Err(e) => {
                warn!(error = %e, engine = request.engine, "ocr failed, continuing with empty text");
                (String::new(), Some(e.to_string()))
            }
        };

        let product = self.extractor.extract_structured_data(&ocr_text).await;

        let ocr_result = match product.as_ref().and_then(Extraction::product) {
            Some(p) => serde_json::to_value(p).unwrap_or_else(|_| json!({ "text": ocr_text })),
            None => json!({ "text": ocr_text }),
        };
        let analysis = self
            .analyzer
            .run_llm_analysis(&AnalysisRequest {
                ocr_result: Some(ocr_result),
                user_notes: request.user_notes,
                health_snapshot: request.health_profile,
            })
            .await;

        info!(
            ocr_chars = ocr_text.len(),
            ocr_failed = ocr_error.is_some(),
            extracted = product.as_ref().is_some_and(|p| p.product().is_some()),
            analysis_error = analysis.error.is_some(),
            "scan complete"
        );

        ScanReport {
            ocr_text,
            ocr_error,
            product,
            analysis,
        }
    }
}
