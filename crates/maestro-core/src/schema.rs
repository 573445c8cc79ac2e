//! Structural argument schemas
//!
//! A capability action declares the shape of its argument map with an
//! `ArgumentSchema`: a small JSON-schema subset (type / required /
//! properties / enum / items). The contract the pipeline relies on is only
//! "is this argument map valid, and if not, which fields are missing or
//! wrong"; any representation that answers that would do.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Structural validator for a map of named arguments
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ArgumentSchema {
    schema: Value,
}

/// Validation failure: which fields are missing or mismatched, plus a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl ArgumentSchema {
    /// Schema that accepts any argument map
    pub fn any() -> Self {
        Self { schema: Value::Null }
    }

    /// Wrap a raw JSON-schema value
    pub fn from_value(schema: Value) -> Self {
        Self { schema }
    }

    /// Build an object schema from `properties` and required field names
    pub fn object(properties: Value, required: &[&str]) -> Self {
        let required: Vec<Value> = required
            .iter()
            .map(|f| Value::String((*f).to_string()))
            .collect();
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Raw schema value (Null when the schema accepts anything)
    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Required field names declared by the schema
    pub fn required_fields(&self) -> Vec<String> {
        self.schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Required fields not present in the given argument map
    pub fn missing_fields(&self, args: &Map<String, Value>) -> Vec<String> {
        self.required_fields()
            .into_iter()
            .filter(|field| !args.contains_key(field))
            .collect()
    }

    /// Validate an argument map against the schema
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), SchemaViolation> {
        if self.schema.is_null() {
            return Ok(());
        }

        let mut missing = Vec::new();
        let mut mismatched = Vec::new();
        let value = Value::Object(args.clone());
        walk(&value, &self.schema, "$", &mut missing, &mut mismatched);

        if missing.is_empty() && mismatched.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing required field(s): {}", missing.join(", ")));
        }
        if !mismatched.is_empty() {
            parts.push(format!("invalid field(s): {}", mismatched.join(", ")));
        }
        Err(SchemaViolation {
            missing,
            mismatched,
            message: parts.join("; "),
        })
    }
}

fn walk(
    value: &Value,
    schema: &Value,
    path: &str,
    missing: &mut Vec<String>,
    mismatched: &mut Vec<String>,
) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(type_spec) = schema_obj.get("type") {
        if !type_matches(value, type_spec) {
            mismatched.push(format!("{} (expected type {})", path, type_spec));
            return;
        }
    }

    if let Some(variants) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !variants.iter().any(|candidate| candidate == value) {
            mismatched.push(format!("{} (not an allowed value)", path));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        if let Some(object) = value.as_object() {
            for key in required.iter().filter_map(|v| v.as_str()) {
                if !object.contains_key(key) {
                    missing.push(field_path(path, key));
                }
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        if let Some(object) = value.as_object() {
            for (key, property_schema) in properties {
                if let Some(child) = object.get(key) {
                    walk(child, property_schema, &field_path(path, key), missing, mismatched);
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        if let Some(array) = value.as_array() {
            for (idx, item) in array.iter().enumerate() {
                walk(
                    item,
                    item_schema,
                    &format!("{}[{}]", path, idx),
                    missing,
                    mismatched,
                );
            }
        }
    }
}

fn field_path(path: &str, key: &str) -> String {
    if path == "$" {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn type_matches(value: &Value, type_spec: &Value) -> bool {
    let matches = |t: &str, v: &Value| match t {
        "object" => v.is_object(),
        "array" => v.is_array(),
        "string" => v.is_string(),
        "number" => v.is_number(),
        "integer" => v.as_i64().is_some() || v.as_u64().is_some(),
        "boolean" => v.is_boolean(),
        "null" => v.is_null(),
        _ => false,
    };

    match type_spec {
        Value::String(type_name) => matches(type_name, value),
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| matches(t, value)),
        _ => false,
    }
}
