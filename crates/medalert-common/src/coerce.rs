//! Loose-to-strict conversions for untrusted model JSON.

use serde_json::Value;

/// JavaScript truthiness: `false`, `null`, `0`, and `""` are false.
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Text form of a value. `None` for null; containers render as compact JSON.
pub(crate) fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Text for a field that should have been a string. Lists of scalars are joined
/// with `"; "`; null, missing, and objects give `""`.
pub(crate) fn to_prose(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Bool(_) | Value::Number(_))) => v.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_object() && !v.is_array())
            .filter_map(to_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!("false"))));
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!([]))));
    }

    #[test]
    fn test_to_prose() {
        assert_eq!(to_prose(Some(&json!("eat greens"))), "eat greens");
        assert_eq!(
            to_prose(Some(&json!(["salad", " nuts ", "", {"x": 1}]))),
            "salad; nuts"
        );
        assert_eq!(to_prose(Some(&json!(2))), "2");
        assert_eq!(to_prose(Some(&json!({"a": "b"}))), "");
        assert_eq!(to_prose(None), "");
    }
}
