use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How the caller wants the model's answer shaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Any JSON value.
    Json,
    /// JSON that must validate against `schema`.
    Schema { name: String, schema: Value },
}

impl ResponseFormat {
    pub fn schema(name: impl Into<String>, schema: Value) -> Self {
        ResponseFormat::Schema {
            name: name.into(),
            schema,
        }
    }

    pub fn is_structured(&self) -> bool {
        !matches!(self, ResponseFormat::Text)
    }
}

/// Fully resolved generation settings for one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model_id: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl GenerationParams {
    pub fn new(model_id: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model_id: model_id.into(),
            max_tokens,
            temperature: None,
            top_p: None,
            response_format: ResponseFormat::Text,
        }
    }

    /// Returns a new parameter set where every field present in `overrides`
    /// replaces the corresponding default. `self` is left untouched.
    pub fn merge(&self, overrides: &GenerationOverrides) -> GenerationParams {
        GenerationParams {
            model_id: overrides
                .model_id
                .clone()
                .unwrap_or_else(|| self.model_id.clone()),
            max_tokens: overrides.max_tokens.unwrap_or(self.max_tokens),
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            response_format: overrides
                .response_format
                .clone()
                .unwrap_or_else(|| self.response_format.clone()),
        }
    }
}

/// Per-call adjustments layered over the client defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOverrides {
    pub model_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub timeout: Option<Duration>,
}

impl GenerationOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
