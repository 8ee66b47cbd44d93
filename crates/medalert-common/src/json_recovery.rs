/// Best-effort recovery of a JSON value from free-form model output.
///
/// Models are asked for strict JSON but routinely wrap it in prose or code fences.
/// Recovery is two-staged: a direct parse of the whole reply, then a parse of the
/// greedy brace span (first `{` through last `}`).
///
/// Limits of the brace scan:
/// - The span is greedy, so a reply holding two sibling objects (`{..} and {..}`)
///   yields an unparseable span and recovery fails.
/// - Braces inside string literals are not treated specially; a stray `}` in
///   trailing prose extends the span past the real object.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static BRACE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Parse `text` as JSON, falling back to its greedy brace span.
///
/// Returns `None` for blank text or when neither stage yields valid JSON.
pub fn parse_model_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let span = brace_span(trimmed)?;
    serde_json::from_str::<Value>(span).ok()
}

/// Like [`parse_model_json`] but only accepts a JSON object.
pub fn parse_model_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    match parse_model_json(text)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// The first `{` through the last `}` of `text`, if any.
pub fn brace_span(text: &str) -> Option<&str> {
    BRACE_SPAN.find(text).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        assert_eq!(parse_model_json(r#"{"a":1}"#), Some(json!({"a": 1})));
        assert_eq!(parse_model_json("  [1, 2]\n"), Some(json!([1, 2])));
    }

    #[test]
    fn test_brace_scan_recovers_embedded_object() {
        let raw = "noise {\"a\":1} trailing";
        assert_eq!(parse_model_json(raw), Some(json!({"a": 1})));
    }

    #[test]
    fn test_brace_scan_handles_code_fences_and_nesting() {
        let raw = "Here you go:\n```json\n{\"outer\": {\"inner\": [1, 2]}}\n```\n";
        assert_eq!(
            parse_model_json(raw),
            Some(json!({"outer": {"inner": [1, 2]}}))
        );
    }

    #[test]
    fn test_greedy_span_over_sibling_objects_fails() {
        let raw = r#"first {"a":1} then {"b":2}"#;
        assert_eq!(brace_span(raw), Some(r#"{"a":1} then {"b":2}"#));
        assert_eq!(parse_model_json(raw), None);
    }

    #[test]
    fn test_no_json() {
        assert_eq!(parse_model_json(""), None);
        assert_eq!(parse_model_json("   \n"), None);
        assert_eq!(parse_model_json("I could not read the label."), None);
        assert_eq!(parse_model_json("{ not json }"), None);
    }

    #[test]
    fn test_parse_model_object_rejects_non_objects() {
        assert!(parse_model_object("[1,2,3]").is_none());
        assert!(parse_model_object("42").is_none());
        let map = parse_model_object("x {\"k\": \"v\"} y").unwrap();
        assert_eq!(map.get("k"), Some(&json!("v")));
    }
}
