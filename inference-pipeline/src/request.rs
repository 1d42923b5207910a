use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage,
};
use common::error::AppError;
use serde_json::{json, Map, Value};

pub fn system_message(content: &str) -> ChatCompletionRequestMessage {
    ChatCompletionRequestSystemMessage::from(content).into()
}

pub fn user_message(content: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestUserMessage::from(content.into()).into()
}

/// `response_format` asking for a JSON object, optionally bound to a schema.
pub fn json_object_format(schema: Option<&Value>) -> Value {
    match schema {
        Some(schema) => json!({ "type": "json_object", "schema": schema }),
        None => json!({ "type": "json_object" }),
    }
}

/// Body of a generation call: `{messages, model?, ...parameters}`.
///
/// Later parameters win over earlier ones, so callers pass defaults first and
/// hard requirements last.
pub fn build_request_body(
    messages: &[ChatCompletionRequestMessage],
    model: Option<&str>,
    parameter_layers: &[&Map<String, Value>],
) -> Result<Value, AppError> {
    let mut body = Map::new();
    body.insert("messages".into(), serde_json::to_value(messages)?);

    if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
        body.insert("model".into(), Value::String(model.to_string()));
    }

    for layer in parameter_layers {
        for (key, value) in layer.iter() {
            body.insert(key.clone(), value.clone());
        }
    }

    Ok(Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_roles_model_and_merged_parameters() {
        let messages = vec![system_message("be strict"), user_message("a cat")];
        let defaults = json!({"temperature": 0.2, "max_tokens": 1200})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let caller = json!({"temperature": 0.9})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let required = json!({"response_format": json_object_format(None)})
            .as_object()
            .cloned()
            .unwrap_or_default();

        let body = build_request_body(&messages, Some("small"), &[&defaults, &caller, &required])
            .expect("body");

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be strict");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["model"], "small");
        assert_eq!(body["temperature"], 0.9);
        assert_eq!(body["max_tokens"], 1200);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn blank_model_is_omitted() {
        let body = build_request_body(&[user_message("x")], Some(" "), &[]).expect("body");
        assert!(body.get("model").is_none());
    }

    #[test]
    fn schema_format_embeds_schema() {
        let schema = json!({"type": "object"});
        assert_eq!(
            json_object_format(Some(&schema)),
            json!({"type": "json_object", "schema": {"type": "object"}})
        );
    }
}
