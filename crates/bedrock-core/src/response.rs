use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{BedrockError, Result};

/// A model reply, shaped according to the `ResponseFormat` that was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ModelResponse {
    Text(String),
    Json(Value),
    Structured { schema: String, value: Value },
}

impl ModelResponse {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelResponse::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ModelResponse::Text(_) => None,
            ModelResponse::Json(value) => Some(value),
            ModelResponse::Structured { value, .. } => Some(value),
        }
    }

    /// Deserialize a JSON or schema-validated reply into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.value().ok_or_else(|| {
            BedrockError::ValidationError("Response is plain text, not JSON".to_string())
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| BedrockError::ValidationError(format!("Response does not match type: {e}")))
    }
}

impl fmt::Display for ModelResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelResponse::Text(text) => f.write_str(text),
            ModelResponse::Json(value) | ModelResponse::Structured { value, .. } => {
                let pretty = serde_json::to_string_pretty(value).map_err(|_| fmt::Error)?;
                f.write_str(&pretty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Joke {
        setup: String,
        punchline: String,
    }

    #[test]
    fn test_deserialize_structured() {
        let response = ModelResponse::Structured {
            schema: "joke".into(),
            value: json!({"setup": "Why?", "punchline": "Because."}),
        };
        let joke: Joke = response.deserialize().unwrap();
        assert_eq!(joke.setup, "Why?");
        assert_eq!(joke.punchline, "Because.");
    }

    #[test]
    fn test_deserialize_text_fails() {
        let response = ModelResponse::Text("just words".into());
        let result: Result<Joke> = response.deserialize();
        assert!(matches!(result, Err(BedrockError::ValidationError(_))));
        assert_eq!(response.as_text(), Some("just words"));
    }

    #[test]
    fn test_display() {
        assert_eq!(ModelResponse::Text("hi".into()).to_string(), "hi");
        let json = ModelResponse::Json(json!({"a": 1}));
        assert!(json.to_string().contains("\"a\": 1"));
    }
}
