use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

mod params;
mod response;

pub use params::{GenerationOverrides, GenerationParams, ResponseFormat};
pub use response::ModelResponse;

/// A single conversation entry. Fields are private so a recorded message
/// cannot be edited after the fact; callers only ever receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: MessageRole,
    content: String,
    sequence_number: u64,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, sequence_number: u64) -> Self {
        Self {
            role,
            content: content.into(),
            sequence_number,
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn to_prompt(&self) -> PromptMessage {
        PromptMessage::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Summary,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Summary => "summary",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role/content pair as it goes over the wire to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }
}

/// Everything a model needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub params: GenerationParams,
}

/// Raw output of a model call, before any structured-output parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub text: String,
    pub usage: Option<TokenStatistics>,
}

impl ModelOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenStatistics) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatistics {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub cache_hits: usize,
}

impl TokenStatistics {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cache_hits: 0,
        }
    }

    pub fn accumulate(&mut self, other: &TokenStatistics) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.cache_hits += other.cache_hits;
    }
}

#[derive(Error, Debug)]
pub enum BedrockError {
    #[error("Model invocation failed: {0}")]
    InvocationError(String),

    #[error("Structured output validation failed: {0}")]
    ValidationError(String),

    #[error("Summarization failed: {0}")]
    SummarizationError(String),

    #[error("Model call timed out after {0:?}")]
    TimeoutError(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BedrockError>;

/// The narrow seam between conversation logic and whatever actually talks to
/// a model. Implementations own transport, authentication and retries.
#[async_trait::async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let message = Message::new(MessageRole::User, "hello", 3);
        assert_eq!(message.role(), MessageRole::User);
        assert_eq!(message.content(), "hello");
        assert_eq!(message.sequence_number(), 3);

        let prompt = message.to_prompt();
        assert_eq!(prompt, PromptMessage::user("hello"));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Summary).unwrap();
        assert_eq!(json, "\"summary\"");

        let role: MessageRole = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, MessageRole::Assistant);
        assert_eq!(role.to_string(), "assistant");
    }

    #[test]
    fn test_token_accumulation() {
        let mut total = TokenStatistics::default();
        total.accumulate(&TokenStatistics::new(10, 5));
        total.accumulate(&TokenStatistics::new(3, 2));

        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total_tokens, 20);
    }
}
