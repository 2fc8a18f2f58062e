//! Turns raw model text into the response shape the caller asked for.
//!
//! Models asked for JSON still like to wrap it in markdown fences or a
//! sentence of preamble, so extraction is tolerant; validation is not.

use bedrock_core::{BedrockError, ModelResponse, ResponseFormat, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::debug;

const JSON_INSTRUCTION: &str =
    "Respond only with valid JSON. Do not wrap it in markdown code fences or add any commentary.";

/// System instruction that steers the model toward the requested format.
/// Plain text needs no instruction.
pub fn instruction_for(format: &ResponseFormat) -> Option<String> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::Json => Some(JSON_INSTRUCTION.to_string()),
        ResponseFormat::Schema { name, schema } => {
            let rendered =
                serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
            Some(format!(
                "{JSON_INSTRUCTION}\nThe JSON must conform to the schema named '{name}':\n{rendered}"
            ))
        }
    }
}

/// Parse raw model output according to `format`.
pub fn parse_response(raw: &str, format: &ResponseFormat) -> Result<ModelResponse> {
    match format {
        ResponseFormat::Text => Ok(ModelResponse::Text(raw.to_string())),
        ResponseFormat::Json => Ok(ModelResponse::Json(extract_json(raw)?)),
        ResponseFormat::Schema { name, schema } => {
            let value = extract_json(raw)?;
            validate(&value, schema)?;
            debug!("Model output validated against schema '{}'", name);
            Ok(ModelResponse::Structured {
                schema: name.clone(),
                value,
            })
        }
    }
}

/// Pull a JSON value out of model text. Accepts bare JSON, a fenced code
/// block, or the first balanced object/array embedded in prose.
pub fn extract_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(inner) {
            return Ok(value);
        }
    }

    let span = balanced_span(trimmed).ok_or_else(|| {
        BedrockError::ValidationError("No JSON value found in model output".to_string())
    })?;
    serde_json::from_str(span)
        .map_err(|e| BedrockError::ValidationError(format!("Model output is not valid JSON: {e}")))
}

/// Validate `value` against a JSON Schema document.
pub fn validate(value: &Value, schema: &Value) -> Result<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| BedrockError::ValidationError(format!("Invalid JSON schema: {e}")))?;

    let result = compiled.validate(value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(BedrockError::ValidationError(messages.join("; ")));
    }
    Ok(())
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // skip an optional language tag such as ```json
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn joke_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "setup": {"type": "string"},
                "punchline": {"type": "string"},
                "category": {"type": "string"}
            },
            "required": ["setup", "punchline", "category"]
        })
    }

    #[test]
    fn test_extract_bare_json() {
        let value = extract_json(r#"  {"a": 1}  "#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here you go:\n```json\n{\"languages\": [\"Rust\", \"Go\"]}\n```\nEnjoy!";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["languages"][0], "Rust");
    }

    #[test]
    fn test_extract_embedded_json_with_braces_in_strings() {
        let raw = r#"Sure! {"text": "a } inside", "n": [1, 2]} Hope that helps."#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value, json!({"text": "a } inside", "n": [1, 2]}));
    }

    #[test]
    fn test_extract_without_json_fails() {
        let result = extract_json("I cannot answer in JSON today.");
        assert!(matches!(result, Err(BedrockError::ValidationError(_))));
    }

    #[test]
    fn test_schema_match_returns_structured_value() {
        let format = ResponseFormat::schema("joke", joke_schema());
        let raw = r#"{"setup": "Why do programmers prefer dark mode?", "punchline": "Because light attracts bugs.", "category": "programming"}"#;

        let response = parse_response(raw, &format).unwrap();
        match &response {
            ModelResponse::Structured { schema, value } => {
                assert_eq!(schema, "joke");
                assert_eq!(value["category"], "programming");
            }
            other => panic!("unexpected response: {other:?}"),
        }

        #[derive(Deserialize)]
        struct Joke {
            punchline: String,
        }
        let joke: Joke = response.deserialize().unwrap();
        assert_eq!(joke.punchline, "Because light attracts bugs.");
    }

    #[test]
    fn test_schema_violation_is_validation_error() {
        let format = ResponseFormat::schema("joke", joke_schema());
        let result = parse_response(r#"{"setup": 42}"#, &format);

        match result {
            Err(BedrockError::ValidationError(message)) => {
                assert!(!message.is_empty());
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_schema_is_validation_error() {
        let result = validate(&json!({}), &json!({"type": 12}));
        assert!(matches!(result, Err(BedrockError::ValidationError(_))));
    }

    #[test]
    fn test_text_passthrough_and_instructions() {
        let response = parse_response("  spaced  ", &ResponseFormat::Text).unwrap();
        assert_eq!(response, ModelResponse::Text("  spaced  ".into()));

        assert!(instruction_for(&ResponseFormat::Text).is_none());
        assert!(instruction_for(&ResponseFormat::Json).unwrap().contains("JSON"));
        let schema_instruction =
            instruction_for(&ResponseFormat::schema("joke", joke_schema())).unwrap();
        assert!(schema_instruction.contains("'joke'"));
        assert!(schema_instruction.contains("punchline"));
    }
}
