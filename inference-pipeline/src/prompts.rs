use serde_json::{json, Value};

pub static SCHEMA_SYSTEM_MESSAGE: &str = r#"You write JSON Schema (draft 2020-12) for exactly one JSON object record.
Reply with a single JSON object and nothing else: no prose, no Markdown fences.
Include "$schema", "type": "object", "properties", "required" and "additionalProperties": false.
Every property is a schema object with a "type". Use only string, integer, number, boolean, object, array and null.
Add constraints (enum, minimum, maximum, format, pattern, minItems) where they help.
Descriptions stay under twelve words. Never include "examples"."#;

pub static DATASET_SCHEMA_SYSTEM_MESSAGE: &str = r#"You write JSON Schema (draft 2020-12) for one row of a synthetic machine-learning dataset.
Reply with a single JSON object and nothing else: no prose, no Markdown fences.
Include "$schema", "type": "object", "properties", "required" and "additionalProperties": false.
A required "label" property holds the ground truth. Use "enum" for its classes; infer two to seven when none are given.
Prefer a required string "record_id".
No other property may restate the label. Free-text descriptions must say the text never names the label.
Descriptions stay under twelve words. Never include "examples"."#;

pub static RECORD_SYSTEM_MESSAGE: &str = r#"You generate exactly one JSON object record.
Reply with strict JSON only: double quotes, no trailing commas, no comments, no Markdown fences, no prose.
When a schema is given it is the contract: use its property names, include every required property, match every type and constraint, add nothing else.
All data is fictional. Use example.com style domains for emails and URLs.
Vary values between calls."#;

pub static DATASET_RECORD_SYSTEM_MESSAGE: &str = r#"You generate exactly one row of a synthetic machine-learning dataset as a JSON object.
Reply with strict JSON only: double quotes, no trailing commas, no comments, no Markdown fences, no prose.
When a schema is given it is the contract: use its property names, include every required property, match every type and constraint, add nothing else.
The "label" field is ground truth and must agree with the other fields.
Never write the label, or an obvious synonym, in any other field and never hint at it.
All data is fictional. Vary values between calls."#;

pub fn schema_system_message(dataset_mode: bool) -> &'static str {
    if dataset_mode {
        DATASET_SCHEMA_SYSTEM_MESSAGE
    } else {
        SCHEMA_SYSTEM_MESSAGE
    }
}

pub fn record_system_message(dataset_mode: bool) -> &'static str {
    if dataset_mode {
        DATASET_RECORD_SYSTEM_MESSAGE
    } else {
        RECORD_SYSTEM_MESSAGE
    }
}

pub fn schema_user_message(prompt: &str) -> String {
    format!(
        "{prompt}\n\nReturn ONLY the JSON Schema object.\nDo NOT include example values inside properties.\nEvery property value must be a JSON Schema object with a type field."
    )
}

pub fn conforming_record_message(schema: &Value) -> String {
    format!(
        "Generate one example record that CONFORMS to this JSON schema.\nReturn ONLY the record JSON object (never the schema).\n{schema}"
    )
}

/// Constraint sent with schema requests: the answer must itself be an object schema.
pub fn schema_meta_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "$schema": { "type": "string" },
            "type": { "const": "object" },
            "properties": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "required": ["type"]
                }
            },
            "required": { "type": "array", "items": { "type": "string" } },
            "additionalProperties": { "type": "boolean" }
        },
        "required": ["type", "properties"]
    })
}
