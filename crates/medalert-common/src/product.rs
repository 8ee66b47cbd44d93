/// Structured extraction of product identity and ingredients from label text.
///
/// One model call builds the record; when the reply holds no JSON object a single
/// repair prompt is sent carrying the first reply verbatim. The parsed object is
/// then normalized field by field so callers always see the full shape.
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::coerce::{to_text, truthy};
use crate::gemini::TextGenerator;
use crate::json_recovery::parse_model_object;
use crate::template::fill;

/// Model used for extraction unless configured otherwise.
pub const DEFAULT_EXTRACTION_MODEL: &str = "gemini-2.5-flash";

const PRODUCT_SCHEMA: &str = r#"{
  "productName": string | null,
  "productNameInferred": boolean,
  "description": string | null,
  "descriptionInferred": boolean,
  "ingredients": [ "string", ... ] | [],
  "sources": [ "https://...", ... ],
  "confidence": number
}"#;

const EXTRACTION_PROMPT: &str = r#"You are an expert data extractor for packaged health / food products (e.g., dietary supplements, powders, breakfast cereals, health bars).
Return a SINGLE JSON object only (no commentary, no code fences, no extra text) with product identification and ingredients extracted from the text below.

IMPORTANT RULES:
1. Use only the given text. If unclear, infer productName and description.
2. If confident info missing, mark inferred flags as true.
3. Avoid hallucinations; never make up data not found or inferable.
4. Use concise, human-like tone for description.
5. Output strictly in JSON format with the following schema:

{schema}

TEXT IN IMAGE:
---
{label_text}
---
JSON:
"#;

const REPAIR_PROMPT: &str = r#"The previous response did not return valid JSON. Below is your output:

---
{previous_output}
---

Please now return ONLY one strict JSON object that follows this schema:

{schema}

Return ONLY the JSON object, nothing else.
"#;

pub const NO_TEXT_ERROR: &str = "No text returned from Gemini model.";
pub const UNPARSEABLE_ERROR: &str = "Failed to parse JSON after retry.";

/// Product identity and ingredient list read off a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedProduct {
    pub product_name: Option<String>,
    pub product_name_inferred: bool,
    pub description: Option<String>,
    pub description_inferred: bool,
    pub ingredients: Vec<String>,
    /// URLs the model cited.
    pub sources: Vec<String>,
    /// 0 to 100.
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionFailure {
    pub error: String,
    /// The first model reply, kept for diagnosis when no JSON could be recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Extraction {
    Product(ExtractedProduct),
    Failed(ExtractionFailure),
}

impl Extraction {
    pub fn product(&self) -> Option<&ExtractedProduct> {
        match self {
            Extraction::Product(p) => Some(p),
            Extraction::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Extraction::Product(_) => None,
            Extraction::Failed(f) => Some(&f.error),
        }
    }

    fn failed(error: impl Into<String>, raw_model_output: Option<String>) -> Self {
        Extraction::Failed(ExtractionFailure {
            error: error.into(),
            raw_model_output,
        })
    }
}

impl ExtractedProduct {
    /// Build a product from a parsed model object, defaulting every field independently.
    pub fn from_value(obj: &Map<String, Value>) -> Self {
        let ingredients = match obj.get("ingredients") {
            Some(Value::Array(items)) => items.iter().map(ingredient_text).collect(),
            _ => Vec::new(),
        };

        let sources = match obj.get("sources") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            product_name: obj.get("productName").and_then(to_text),
            product_name_inferred: truthy(obj.get("productNameInferred")),
            description: obj.get("description").and_then(to_text),
            description_inferred: truthy(obj.get("descriptionInferred")),
            ingredients,
            sources,
            confidence: clamp_confidence(obj.get("confidence")),
        }
    }
}

/// Every entry is kept; non-strings use their JSON text, so `null` reads "null".
fn ingredient_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Round half up and clamp into 0..=100; anything but a JSON number is 0.
fn clamp_confidence(value: Option<&Value>) -> u8 {
    value
        .and_then(Value::as_f64)
        .map(|f| (f + 0.5).floor().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

fn extraction_prompt(label_text: &str) -> String {
    fill(
        EXTRACTION_PROMPT,
        &[("schema", PRODUCT_SCHEMA), ("label_text", label_text)],
    )
}

fn repair_prompt(previous_output: &str) -> String {
    fill(
        REPAIR_PROMPT,
        &[("schema", PRODUCT_SCHEMA), ("previous_output", previous_output)],
    )
}

pub struct StructuredExtractor {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl StructuredExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Extract a product record from label text.
    ///
    /// `None` for blank input. Otherwise a normalized product, or a failure record
    /// when the model could not be reached or never produced a JSON object.
    pub async fn extract_structured_data(&self, text: &str) -> Option<Extraction> {
        if text.trim().is_empty() {
            return None;
        }
        Some(self.extract(text).await)
    }

    async fn extract(&self, text: &str) -> Extraction {
        let first = match self.generator.generate(&self.model, &extraction_prompt(text)).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return Extraction::failed(NO_TEXT_ERROR, None),
            Err(e) => {
                error!(error = %e, model = %self.model, "product extraction request failed");
                return Extraction::failed(e.to_string(), None);
            }
        };

        if let Some(obj) = parse_model_object(&first) {
            return Extraction::Product(ExtractedProduct::from_value(&obj));
        }

        warn!(
            model = %self.model,
            raw_len = first.len(),
            "extraction reply held no JSON object, sending repair prompt"
        );
        let second = match self.generator.generate(&self.model, &repair_prompt(&first)).await {
            Ok(raw) => raw.unwrap_or_default(),
            Err(e) => {
                error!(error = %e, model = %self.model, "product extraction repair request failed");
                return Extraction::failed(e.to_string(), None);
            }
        };

        match parse_model_object(&second) {
            Some(obj) => {
                debug!(model = %self.model, "repair prompt produced valid JSON");
                Extraction::Product(ExtractedProduct::from_value(&obj))
            }
            None => Extraction::failed(UNPARSEABLE_ERROR, Some(first)),
        }
    }
}
