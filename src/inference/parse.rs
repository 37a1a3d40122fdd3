//! Tolerant decoding of model output.
//!
//! The model is asked for JSON but may wrap it in prose or markdown fences,
//! emit numbers as strings, or produce nothing useful at all. Decoding never
//! fails: the last resort is a single "Unidentified food" item.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::{DetectedFood, FoodAnalysis, NameEstimate};
use crate::meals::model::{clamp_nutrient, parse_amount};

pub const FALLBACK_NAME: &str = "Unidentified food";
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoJson,
    #[error("model output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").unwrap();
}

/// Decodes an image analysis. Falls back to the single unidentified item.
pub fn parse_analysis(text: &str) -> FoodAnalysis {
    match decode_analysis(text) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, len = text.len(), "analysis output unreadable; using fallback");
            fallback_analysis()
        }
    }
}

/// Decodes a name estimate. Falls back to an unidentified zero-calorie entry
/// carrying the requested name.
pub fn parse_estimate(text: &str, requested: &str) -> NameEstimate {
    let decoded = extract_value(text).and_then(|v| {
        let v = match v {
            Value::Array(mut xs) if !xs.is_empty() => xs.swap_remove(0),
            other => other,
        };
        from_value::<NameEstimate>(v)
    });
    match decoded {
        Ok(mut e) => {
            if e.name.trim().is_empty() {
                e.name = requested.trim().to_string();
            }
            e
        }
        Err(e) => {
            warn!(error = %e, name = requested, "estimate output unreadable; using fallback");
            fallback_estimate(requested)
        }
    }
}

pub fn fallback_analysis() -> FoodAnalysis {
    FoodAnalysis {
        items: vec![DetectedFood {
            name: FALLBACK_NAME.to_string(),
            calories: 0.0,
            protein: 0.0,
            carbs: 0.0,
            fat: 0.0,
            fiber: 0.0,
            sugar: 0.0,
            sodium: 0.0,
            confidence: FALLBACK_CONFIDENCE,
            portion_label: None,
            ingredients: Vec::new(),
            macro_character: None,
        }],
        overall_confidence: FALLBACK_CONFIDENCE,
        description: None,
        suggestions: Vec::new(),
    }
}

pub fn fallback_estimate(requested: &str) -> NameEstimate {
    let name = requested.trim();
    NameEstimate {
        name: if name.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            name.to_string()
        },
        calories: 0.0,
        protein: 0.0,
        carbs: 0.0,
        fat: 0.0,
        fiber: 0.0,
        sugar: 0.0,
        sodium: 0.0,
        serving_description: None,
        confidence: FALLBACK_CONFIDENCE,
    }
}

fn decode_analysis(text: &str) -> Result<FoodAnalysis, ParseError> {
    let value = extract_value(text)?;
    let value = match value {
        // bare list of items
        Value::Array(items) => serde_json::json!({ "items": items }),
        // a single item without the wrapper
        Value::Object(map) if !map.contains_key("items") && map.contains_key("name") => {
            serde_json::json!({ "items": [Value::Object(map)] })
        }
        other => other,
    };
    from_value(value)
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ParseError> {
    Ok(serde_json::from_value(value)?)
}

/// Strict parse first, then the fenced block, then the outermost `{...}` span.
fn extract_value(text: &str) -> Result<Value, ParseError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Ok(v);
        }
    }
    if let Some(inner) = CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            debug!("decoded fenced model output");
            return Ok(v);
        }
    }
    let start = trimmed.find('{').ok_or(ParseError::NoJson)?;
    let end = trimmed.rfind('}').ok_or(ParseError::NoJson)?;
    if end <= start {
        return Err(ParseError::NoJson);
    }
    let v = serde_json::from_str::<Value>(&trimmed[start..=end])?;
    debug!("decoded outermost object span");
    Ok(v)
}

// --- lenient field decoders ---

pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64().map(clamp_nutrient).unwrap_or(0.0),
        Some(Value::String(s)) => parse_amount(&s),
        _ => 0.0,
    })
}

pub(crate) fn lenient_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = lenient_f64(d)?;
    // some models answer in percent
    Ok(if v > 1.0 { (v / 100.0).min(1.0) } else { v })
}

pub(crate) fn lenient_opt_string<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn lenient_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Array(xs)) => xs
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json() {
        let a = parse_analysis(
            r#"{"items":[{"name":"Chicken Fried Rice","calories":90,"protein":4,"carbs":12,"fat":3,"confidence":0.8,"portionLabel":"medium"}],"overallConfidence":0.8,"description":"rice","suggestions":["add veg"]}"#,
        );
        assert_eq!(a.items.len(), 1);
        assert_eq!(a.items[0].name, "Chicken Fried Rice");
        assert_eq!(a.items[0].calories, 90.0);
        assert_eq!(a.items[0].portion_label.as_deref(), Some("medium"));
        assert_eq!(a.suggestions, vec!["add veg".to_string()]);
    }

    #[test]
    fn fenced_and_prose_wrapped() {
        let text = "Sure! Here is the result:\n```json\n{\"items\":[{\"name\":\"Toast\",\"calories\":\"120 kcal\"}]}\n```\nEnjoy.";
        let a = parse_analysis(text);
        assert_eq!(a.items[0].name, "Toast");
        assert_eq!(a.items[0].calories, 120.0);

        let text = "The plate contains {\"items\":[{\"name\":\"Egg\",\"calories\":78}]} as far as I can tell";
        let a = parse_analysis(text);
        assert_eq!(a.items[0].name, "Egg");
    }

    #[test]
    fn bare_item_and_bare_list() {
        let a = parse_analysis(r#"{"name":"Banana","calories":105}"#);
        assert_eq!(a.items.len(), 1);
        let a = parse_analysis(r#"[{"name":"A","calories":1},{"name":"B","calories":2}]"#);
        assert_eq!(a.items.len(), 2);
    }

    #[test]
    fn empty_but_valid_is_not_fallback() {
        let a = parse_analysis(r#"{"items":[]}"#);
        assert!(a.items.is_empty());
    }

    #[test]
    fn garbage_yields_single_fallback_item() {
        for text in ["", "I cannot see any food", "{not json}", "} {"] {
            let a = parse_analysis(text);
            assert_eq!(a.items.len(), 1, "input {text:?}");
            assert_eq!(a.items[0].name, FALLBACK_NAME);
            assert_eq!(a.items[0].calories, 0.0);
            assert_eq!(a.items[0].confidence, FALLBACK_CONFIDENCE);
            assert!(!a.items[0].is_usable());
        }
    }

    #[test]
    fn negative_and_null_numbers_clamp() {
        let a = parse_analysis(r#"{"items":[{"name":"X","calories":-5,"fat":null,"confidence":85}]}"#);
        assert_eq!(a.items[0].calories, 0.0);
        assert_eq!(a.items[0].fat, 0.0);
        assert_eq!(a.items[0].confidence, 0.85);
    }

    #[test]
    fn estimate_keeps_requested_name() {
        let e = parse_estimate(r#"{"calories":250,"protein":10,"servingDescription":"1 cup"}"#, "Greek yogurt");
        assert_eq!(e.name, "Greek yogurt");
        assert_eq!(e.calories, 250.0);
        assert_eq!(e.serving_description.as_deref(), Some("1 cup"));

        let e = parse_estimate("no idea", "Greek yogurt");
        assert_eq!(e.name, "Greek yogurt");
        assert_eq!(e.calories, 0.0);
        assert_eq!(e.confidence, FALLBACK_CONFIDENCE);
    }
}
