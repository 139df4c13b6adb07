// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared schema-driven argument validation.
//!
//! Covers the subset of JSON Schema the tool descriptors actually use:
//! `type` on the root object and its properties, `required`, and `enum`.
//! The goal is a precise human-readable mismatch message for the model,
//! not draft compliance.

use serde_json::Value;

/// Validate `args` against a tool's parameter schema.
///
/// Returns `Err(message)` on the first mismatch.  A schema without
/// `properties`/`required` accepts any object.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("arguments must be an object, got {}", type_name(args)));
    }

    let empty = serde_json::Map::new();
    let props = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if args.get(name).is_none() {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    for (name, prop_schema) in props {
        let Some(value) = args.get(name) else {
            continue;
        };
        if let Some(expected) = prop_schema.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!(
                    "argument '{name}' must be {expected}, got {}",
                    type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                return Err(format!(
                    "argument '{name}' must be one of [{}], got {value}",
                    options.join(", ")
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        // JSON Schema "integer" accepts any number without a fractional part.
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_secs": { "type": "integer" },
                "mode": { "type": "string", "enum": ["fast", "careful"] }
            },
            "required": ["command"]
        })
    }

    #[test]
    fn valid_args_pass() {
        let args = json!({"command": "ls", "timeout_secs": 5, "mode": "fast"});
        assert!(validate_args(&schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_is_reported_by_name() {
        let err = validate_args(&schema(), &json!({})).unwrap_err();
        assert!(err.contains("command"));
    }

    #[test]
    fn wrong_type_is_reported_with_both_types() {
        let err = validate_args(&schema(), &json!({"command": 42})).unwrap_err();
        assert!(err.contains("string"));
        assert!(err.contains("number"));
    }

    #[test]
    fn integer_rejects_fractional_number() {
        let err =
            validate_args(&schema(), &json!({"command": "x", "timeout_secs": 1.5})).unwrap_err();
        assert!(err.contains("timeout_secs"));
    }

    #[test]
    fn integer_accepts_whole_number() {
        assert!(validate_args(&schema(), &json!({"command": "x", "timeout_secs": 30})).is_ok());
    }

    #[test]
    fn enum_mismatch_lists_options() {
        let err = validate_args(&schema(), &json!({"command": "x", "mode": "yolo"})).unwrap_err();
        assert!(err.contains("fast"));
        assert!(err.contains("careful"));
    }

    #[test]
    fn non_object_args_rejected_for_object_schema() {
        let err = validate_args(&schema(), &json!("just a string")).unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn extra_args_are_tolerated() {
        let args = json!({"command": "ls", "unexpected": true});
        assert!(validate_args(&schema(), &args).is_ok());
    }

    #[test]
    fn schema_without_constraints_accepts_anything() {
        assert!(validate_args(&json!({"type": "object"}), &json!({"a": 1})).is_ok());
    }
}
