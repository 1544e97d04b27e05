//! Minimal structural schema validation for configuration trees.
//!
//! Schemas are JSON values using a small subset of JSON Schema keywords:
//! `type`, `enum`, `pattern`, `minimum`, `required`, `properties` and
//! `items`. Validation stops at the first violation and reports it with a
//! JSON-pointer path.

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::{FixtureError, Result};

/// Validate `instance` against `schema`, returning the first violation.
pub fn validate(instance: &Value, schema: &Value) -> Result<()> {
    check(instance, schema, "")
}

fn check(instance: &Value, schema: &Value, pointer: &str) -> Result<()> {
    let Some(rules) = schema.as_object() else {
        // `true`/`{}`-style schemas accept anything.
        return Ok(());
    };
    let at = || {
        if pointer.is_empty() {
            "/".to_string()
        } else {
            pointer.to_string()
        }
    };

    if let Some(expected) = rules.get("type") {
        check_type(instance, expected).map_err(|msg| FixtureError::schema(at(), msg))?;
    }

    if let Some(Value::Array(allowed)) = rules.get("enum") {
        if !allowed.contains(instance) {
            return Err(FixtureError::schema(
                at(),
                format!("{instance} is not one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    if let (Some(Value::String(pattern)), Some(text)) = (rules.get("pattern"), instance.as_str()) {
        let re = Regex::new(pattern)
            .map_err(|e| FixtureError::schema(at(), format!("invalid pattern '{pattern}': {e}")))?;
        if !re.is_match(text) {
            return Err(FixtureError::schema(
                at(),
                format!("\"{text}\" does not match pattern '{pattern}'"),
            ));
        }
    }

    if let (Some(minimum), Some(n)) = (rules.get("minimum").and_then(Value::as_f64), instance.as_f64()) {
        if n < minimum {
            return Err(FixtureError::schema(
                at(),
                format!("{n} is less than minimum {minimum}"),
            ));
        }
    }

    if let Some(object) = instance.as_object() {
        check_object(object, rules, pointer)?;
    }

    if let (Some(items), Some(elements)) = (rules.get("items"), instance.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            check(element, items, &format!("{pointer}/{i}"))?;
        }
    }

    Ok(())
}

fn check_object(object: &Map<String, Value>, rules: &Map<String, Value>, pointer: &str) -> Result<()> {
    if let Some(Value::Array(required)) = rules.get("required") {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(FixtureError::schema(
                    format!("{pointer}/{key}"),
                    "required field is missing",
                ));
            }
        }
    }

    if let Some(Value::Object(properties)) = rules.get("properties") {
        for (key, sub_schema) in properties {
            if let Some(value) = object.get(key) {
                check(value, sub_schema, &format!("{pointer}/{}", escape_pointer(key)))?;
            }
        }
    }

    Ok(())
}

fn check_type(instance: &Value, expected: &Value) -> std::result::Result<(), String> {
    let names: Vec<&str> = match expected {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };

    if names.iter().any(|name| type_matches(instance, name)) {
        Ok(())
    } else {
        Err(format!(
            "expected {}, got {}",
            names.join(" or "),
            type_name(instance)
        ))
    }
}

fn type_matches(instance: &Value, name: &str) -> bool {
    match name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "integer" => instance.is_i64() || instance.is_u64(),
        "number" => instance.is_number(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        _ => false,
    }
}

fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// RFC 6901 escaping for a single pointer segment.
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

// ---------------------------------------------------------------------------
// Built-in schema
// ---------------------------------------------------------------------------

/// Schema describing the standard `[document]`, `[navigation]` and
/// `[payloads]` layout.
pub fn document_schema() -> Value {
    let quantity = json!({ "type": ["integer", "array", "object"] });
    let nav_flag = json!({ "type": ["boolean", "string"], "pattern": "^(?i)(auto|true|false)$" });

    json!({
        "type": "object",
        "required": ["document"],
        "properties": {
            "document": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "language": { "type": "string", "pattern": "^[A-Za-z]{2,3}(-[A-Za-z0-9]+)*$" },
                    "format_version": { "type": "integer", "minimum": 1 },
                    "chapters": quantity,
                    "sections_per_chapter": quantity,
                    "subsections_per_section": quantity,
                    "paragraphs_per_section": quantity,
                    "notes_per_chapter": quantity,
                    "citations_per_chapter": quantity,
                    "images_per_chapter": quantity,
                    "repeat_note_chance": { "type": "number", "minimum": 0 }
                }
            },
            "navigation": {
                "type": "object",
                "properties": {
                    "legacy": nav_flag,
                    "modern": nav_flag,
                    "include_sections": { "type": "boolean" },
                    "max_depth": { "type": "integer", "minimum": 1 }
                }
            },
            "payloads": {
                "type": "object",
                "properties": {
                    "assets_dir": { "type": "string" },
                    "notes": { "type": "array", "items": { "type": "string" } },
                    "paragraphs": { "type": "array", "items": { "type": "string" } },
                    "citations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["in_text"],
                            "properties": {
                                "in_text": { "type": "string" },
                                "entry": { "type": "string" }
                            }
                        }
                    },
                    "images": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["path", "alt_text"],
                            "properties": {
                                "path": { "type": "string" },
                                "alt_text": { "type": "string" },
                                "target_filename": { "type": "string", "pattern": "^[^/].*\\.[A-Za-z0-9]+$" }
                            }
                        }
                    }
                }
            }
        }
    })
}
