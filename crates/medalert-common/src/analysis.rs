/// Personalized health analysis of a scanned product.
///
/// A single model call, no repair prompt. Every path, including transport
/// failure and unparseable replies, returns a fully populated [`AnalysisResult`].
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::coerce::{to_prose, to_text};
use crate::gemini::TextGenerator;
use crate::json_recovery::parse_model_object;
use crate::template::fill;

/// Model used for analysis unless configured otherwise.
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.0-flash";

/// Stored in `rawModelOutput` when the provider answered without text.
pub const NO_TEXT_PLACEHOLDER: &str = "[no text returned]";

const ANALYSIS_PROMPT: &str = r#"You are a health analysis assistant. Use ONLY the OCR data, user notes, and health profile.
DO NOT use web search or any external sources; rely only on the provided OCR, user notes, and health profile.
STRICTLY return JSON in this format:

{
  "usefulIngredients": [
    { "name": "Protein", "rationale": "Helps muscle growth", "quantityLimit": "Max 200g/day" }
  ],
  "harmfulIngredients": [
    { "name": "Sugar", "rationale": "Raises blood sugar", "quantityLimit": "Avoid completely" }
  ],
  "consumptionGuidelines": "Do not exceed 2 scoops per day",
  "foodSuggestions": "Combine with vegetables for fiber",
  "summary": "This product is safe for moderate use but risky for diabetics"
}

OCR RESULT:
{ocr_result}

USER NOTES:
{user_notes}

HEALTH PROFILE:
{health_profile}

Make sure you are suggesting the personalized result with reference to the health profile of the user and in summary mention a little about their health profile in a personalized manner.
Most important: Do not miss summary in the response. foodSuggestions in json response should always be string type only.
"#;

/// Inputs for one analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Structured product data, or raw OCR output when extraction failed.
    #[serde(default)]
    pub ocr_result: Option<Value>,
    #[serde(default)]
    pub user_notes: Option<String>,
    /// The user's health profile, passed through untouched.
    #[serde(default)]
    pub health_snapshot: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngredientAssessment {
    pub name: String,
    pub rationale: String,
    pub quantity_limit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub useful_ingredients: Vec<IngredientAssessment>,
    pub harmful_ingredients: Vec<IngredientAssessment>,
    pub consumption_guidelines: String,
    pub food_suggestions: String,
    pub summary: String,
    pub model: String,
    pub used_web_search: bool,
    /// Always null; analysis never runs with search grounding.
    pub grounding_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<String>,
}

impl AnalysisResult {
    /// All primary fields empty, tagged with `model`.
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            useful_ingredients: Vec::new(),
            harmful_ingredients: Vec::new(),
            consumption_guidelines: String::new(),
            food_suggestions: String::new(),
            summary: String::new(),
            model: model.into(),
            used_web_search: false,
            grounding_metadata: None,
            error: None,
            raw_model_output: None,
        }
    }

    /// Normalize a parsed model object. Fields the model sets for `model`,
    /// `usedWebSearch` or `groundingMetadata` are ignored.
    pub fn from_value(obj: &Map<String, Value>, model: impl Into<String>) -> Self {
        Self {
            useful_ingredients: assessments(obj.get("usefulIngredients")),
            harmful_ingredients: assessments(obj.get("harmfulIngredients")),
            consumption_guidelines: to_prose(obj.get("consumptionGuidelines")),
            food_suggestions: to_prose(obj.get("foodSuggestions")),
            summary: to_prose(obj.get("summary")),
            ..Self::empty(model)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.useful_ingredients.is_empty()
            && self.harmful_ingredients.is_empty()
            && self.summary.is_empty()
    }
}

fn assessments(value: Option<&Value>) -> Vec<IngredientAssessment> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(entry) => {
                let field = |key: &str| {
                    entry
                        .get(key)
                        .and_then(to_text)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default()
                };
                Some(IngredientAssessment {
                    name: field("name"),
                    rationale: field("rationale"),
                    quantity_limit: field("quantityLimit"),
                })
            }
            Value::String(name) => Some(IngredientAssessment {
                name: name.trim().to_string(),
                rationale: String::new(),
                quantity_limit: String::new(),
            }),
            _ => None,
        })
        .filter(|a| !a.name.is_empty())
        .collect()
}

fn pretty_or_empty_object(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "{}".to_string(),
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn analysis_prompt(request: &AnalysisRequest) -> String {
    let notes = request
        .user_notes
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or("N/A");
    let ocr_result = pretty_or_empty_object(request.ocr_result.as_ref());
    let health_profile = pretty_or_empty_object(request.health_snapshot.as_ref());
    fill(
        ANALYSIS_PROMPT,
        &[
            ("ocr_result", ocr_result.as_str()),
            ("user_notes", notes),
            ("health_profile", health_profile.as_str()),
        ],
    )
}

pub struct HealthAnalyzer {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl HealthAnalyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn run_llm_analysis(&self, request: &AnalysisRequest) -> AnalysisResult {
        let prompt = analysis_prompt(request);
        let raw = match self.generator.generate(&self.model, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, model = %self.model, "health analysis request failed");
                return AnalysisResult {
                    error: Some(e.to_string()),
                    ..AnalysisResult::empty(&self.model)
                };
            }
        };

        match raw.as_deref().and_then(parse_model_object) {
            Some(obj) => AnalysisResult::from_value(&obj, &self.model),
            None => {
                warn!(
                    model = %self.model,
                    has_text = raw.is_some(),
                    "analysis reply held no JSON object, returning empty analysis"
                );
                AnalysisResult {
                    raw_model_output: Some(raw.unwrap_or_else(|| NO_TEXT_PLACEHOLDER.to_string())),
                    ..AnalysisResult::empty(&self.model)
                }
            }
        }
    }
}
