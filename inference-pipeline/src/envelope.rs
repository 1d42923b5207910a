//! Locates the generated payload inside the endpoint's response envelope.

use common::error::AppError;
use json_recovery::{recover_json, unwrap_nested_json};
use serde_json::Value;

const SUCCESS_STATUSES: [&str; 4] = ["ok", "success", "succeeded", "200"];

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn first_if_array(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn text_from_part(part: &Value) -> Option<&str> {
    if let Some(text) = part.as_str() {
        return Some(text);
    }
    part.get("text")
        .and_then(Value::as_str)
        .or_else(|| part.pointer("/text/value").and_then(Value::as_str))
        .or_else(|| part.pointer("/content/text").and_then(Value::as_str))
}

/// Text carried by a content value: a string, a list of parts, or a single part.
pub fn extract_text_payload(value: &Value) -> Option<String> {
    match value {
        Value::Array(parts) => {
            let fragments: Vec<&str> = parts.iter().filter_map(text_from_part).collect();
            if fragments.is_empty() {
                None
            } else {
                Some(fragments.join("\n").trim().to_string())
            }
        }
        other => text_from_part(other).map(str::to_string),
    }
}

/// Failure reported inside an otherwise successful HTTP response.
fn envelope_error(data: &Value) -> Option<String> {
    let result = data.get("result")?;
    if let Some(error) = result.get("error").filter(|e| is_truthy(e)) {
        return Some(match error.as_str() {
            Some(message) => message.to_string(),
            None => error.to_string(),
        });
    }

    let status = result.get("status")?.as_str()?.to_lowercase();
    if SUCCESS_STATUSES.contains(&status.as_str()) {
        None
    } else {
        Some(status)
    }
}

fn parse_text(text: &str) -> Result<Value, AppError> {
    recover_json(text).map_err(|err| AppError::LLMParsing(err.to_string()))
}

fn extract_payload(data: &Value) -> Result<Value, AppError> {
    let full_output = present(data.pointer("/result/FULL_OUTPUT")).unwrap_or(data);

    let Some(payload) = first_if_array(full_output) else {
        let text_response = present(data.pointer("/result/TEXT_RESPONSE"))
            .and_then(first_if_array)
            .and_then(extract_text_payload)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::LLMParsing("Inference response missing content".into()))?;
        return parse_text(&text_response);
    };

    let content = present(payload.pointer("/choices/0/message/content"))
        .or_else(|| present(payload.pointer("/message/content")))
        .or_else(|| present(payload.get("content")))
        .unwrap_or(payload);

    match extract_text_payload(content).filter(|t| !t.trim().is_empty()) {
        Some(text) => parse_text(&text),
        None => Ok(unwrap_nested_json(content.clone())),
    }
}

/// Generated JSON value of a response envelope.
///
/// Parse failures take precedence over an envelope-level error message.
pub fn extract_output(data: &Value) -> Result<Value, AppError> {
    let output = extract_payload(data)?;
    match envelope_error(data) {
        Some(message) => Err(AppError::Inference(format!(
            "Inference result error: {message}"
        ))),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_style_choices_are_unwrapped() {
        let data = json!({
            "result": {
                "status": "ok",
                "FULL_OUTPUT": {
                    "choices": [{"message": {"content": "```json\n{\"a\": 1}\n```"}}]
                }
            }
        });
        assert_eq!(extract_output(&data).expect("output"), json!({"a": 1}));
    }

    #[test]
    fn content_parts_are_joined() {
        let data = json!({
            "message": {
                "content": [
                    {"type": "text", "text": "{\"a\":"},
                    {"type": "text", "text": {"value": "2}"}}
                ]
            }
        });
        assert_eq!(extract_output(&data).expect("output"), json!({"a": 2}));
    }

    #[test]
    fn array_full_output_uses_first_entry() {
        let data = json!({"result": {"FULL_OUTPUT": [{"content": "{\"b\": true}"}, {"content": "{}"}]}});
        assert_eq!(extract_output(&data).expect("output"), json!({"b": true}));
    }

    #[test]
    fn structured_content_passes_through() {
        let data = json!({"content": {"name": "Ada"}});
        assert_eq!(extract_output(&data).expect("output"), json!({"name": "Ada"}));
    }

    #[test]
    fn text_response_is_the_last_resort() {
        let data = json!({"result": {"FULL_OUTPUT": [], "TEXT_RESPONSE": ["{\"c\": 3}"]}});
        assert_eq!(extract_output(&data).expect("output"), json!({"c": 3}));
    }

    #[test]
    fn error_field_and_bad_status_fail_the_call() {
        let errored = json!({"result": {"error": "model overloaded", "FULL_OUTPUT": {"content": "{}"}}});
        assert!(matches!(extract_output(&errored), Err(AppError::Inference(m)) if m.contains("overloaded")));

        let bad_status = json!({"result": {"status": "FAILED", "FULL_OUTPUT": {"content": "{}"}}});
        assert!(matches!(extract_output(&bad_status), Err(AppError::Inference(m)) if m.contains("failed")));

        let ok_status = json!({"result": {"status": "Success", "FULL_OUTPUT": {"content": "{}"}}});
        assert_eq!(extract_output(&ok_status).expect("output"), json!({}));
    }

    #[test]
    fn unparseable_text_is_a_parsing_error() {
        let data = json!({"content": "I cannot help with that."});
        assert!(matches!(extract_output(&data), Err(AppError::LLMParsing(_))));
    }
}
