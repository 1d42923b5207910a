use common::error::AppError;
use serde_json::Value;

const STRIPPED_KEYS: [&str; 2] = ["examples", "example"];

/// Schema after cleanup, with a note for every change made.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSchema {
    pub schema: Value,
    pub warnings: Vec<String>,
}

fn strip_examples(value: &mut Value, path: &str, warnings: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for key in STRIPPED_KEYS {
                if map.remove(key).is_some() {
                    warnings.push(format!("removed \"{key}\" at {path}"));
                }
            }
            for (key, child) in map.iter_mut() {
                strip_examples(child, &format!("{path}/{key}"), warnings);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter_mut().enumerate() {
                strip_examples(child, &format!("{path}/{i}"), warnings);
            }
        }
        _ => {}
    }
}

/// Drop example values the model tends to leave inside a schema.
pub fn sanitize_schema(schema: &Value) -> SanitizedSchema {
    let mut schema = schema.clone();
    let mut warnings = Vec::new();
    strip_examples(&mut schema, "#", &mut warnings);
    SanitizedSchema { schema, warnings }
}

fn validate_properties(properties: &serde_json::Map<String, Value>) -> Vec<String> {
    properties
        .iter()
        .filter(|(_, definition)| !definition.is_object())
        .map(|(name, _)| format!("property \"{name}\" must be a schema object"))
        .collect()
}

/// Check that a schema describes exactly one object record.
pub fn validate_schema(schema: &Value) -> Result<(), AppError> {
    let Some(root) = schema.as_object() else {
        return Err(AppError::InvalidSchema("schema must be a JSON object".into()));
    };

    if let Some(kind) = root.get("type") {
        if kind.as_str() != Some("object") {
            return Err(AppError::InvalidSchema(format!(
                "root type must be \"object\", found {kind}"
            )));
        }
    }

    let mut errors = Vec::new();
    match (root.get("properties"), root.get("fields")) {
        (Some(Value::Object(properties)), _) if !properties.is_empty() => {
            errors.extend(validate_properties(properties));
        }
        (_, Some(Value::Array(fields))) if !fields.is_empty() => {
            if !fields
                .iter()
                .all(|f| f.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty()))
            {
                errors.push("every field needs a non-empty \"name\"".to_string());
            }
        }
        _ => errors.push("schema declares no properties".to_string()),
    }

    if let Some(required) = root.get("required") {
        let valid = required
            .as_array()
            .is_some_and(|names| names.iter().all(Value::is_string));
        if !valid {
            errors.push("\"required\" must be a list of property names".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidSchema(errors.join("; ")))
    }
}
