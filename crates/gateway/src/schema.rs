//! Best-effort script metadata.
//!
//! Scripts may declare what they accept and emit:
//!
//! ```js
//! const nyanAcceptedParams = {"addNumber": 2};
//! const nyanOutputColumns = ["result"];
//! ```
//!
//! The extractor scans the source text for these constants. Anything it
//! cannot read yields an empty schema.

use std::sync::LazyLock;

use {
    regex::Regex,
    serde::Serialize,
    serde_json::{Map, Value, json},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptSchema {
    #[serde(rename = "nyanAcceptedParams")]
    pub accepted_params: Map<String, Value>,
    #[serde(rename = "nyanOutputColumns")]
    pub output_columns: Vec<Value>,
}

pub trait SchemaExtractor: Send + Sync {
    fn extract(&self, source: &str) -> ScriptSchema;
}

static ACCEPTED_PARAMS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)const\s+nyanAcceptedParams\s*=\s*(\{.*?\})\s*;").ok()
});

static OUTPUT_COLUMNS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)const\s+nyanOutputColumns\s*=\s*(\[.*?\])\s*;").ok()
});

/// Reads `const nyanAcceptedParams = {..};` and `const nyanOutputColumns = [..];`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstScanExtractor;

impl SchemaExtractor for ConstScanExtractor {
    fn extract(&self, source: &str) -> ScriptSchema {
        ScriptSchema {
            accepted_params: capture(&ACCEPTED_PARAMS, source)
                .and_then(|v| match v {
                    Value::Object(obj) => Some(obj),
                    _ => None,
                })
                .unwrap_or_default(),
            output_columns: capture(&OUTPUT_COLUMNS, source)
                .and_then(|v| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default(),
        }
    }
}

fn capture(pattern: &LazyLock<Option<Regex>>, source: &str) -> Option<Value> {
    let re = pattern.as_ref()?;
    let literal = re.captures(source)?.get(1)?.as_str();
    serde_json::from_str(literal).ok()
}

/// JSON Schema for a tool's arguments, synthesized from the declared
/// example parameters.
///
/// String examples double as the property description; other values give
/// the type and are kept as examples.
pub fn input_schema(schema: &ScriptSchema) -> Value {
    let properties: Map<String, Value> = schema
        .accepted_params
        .iter()
        .map(|(name, example)| {
            let prop = match example {
                Value::String(text) => json!({"type": "string", "description": text}),
                Value::Null => json!({}),
                other => json!({"type": json_type(other), "examples": [other]}),
            };
            (name.clone(), prop)
        })
        .collect();
    json!({"type": "object", "properties": properties})
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
