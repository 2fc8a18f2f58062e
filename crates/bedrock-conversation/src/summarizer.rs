use bedrock_core::{
    BedrockError, GenerationParams, Message, MessageRole, ModelInvoker, ModelOutput, ModelRequest,
    PromptMessage, ResponseFormat, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::manager::invoke_with_timeout;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You maintain a running summary of a conversation between a user and an assistant. \
Merge the existing summary with the new transcript into a single updated summary. \
Keep names, facts, decisions, open questions and user preferences; drop pleasantries. \
Write in the third person and reply with the summary text only.";

/// Folds retired messages into the conversation summary with a dedicated
/// model call.
pub struct Summarizer {
    invoker: Arc<dyn ModelInvoker>,
    params: GenerationParams,
    timeout: Option<Duration>,
}

impl Summarizer {
    /// The response format is always forced to plain text.
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        mut params: GenerationParams,
        timeout: Option<Duration>,
    ) -> Self {
        params.response_format = ResponseFormat::Text;
        Self {
            invoker,
            params,
            timeout,
        }
    }

    /// Every failure, including a timeout or an empty reply, is reported as
    /// `SummarizationError`.
    pub async fn summarize(
        &self,
        previous: Option<&Message>,
        retiring: &[Message],
    ) -> Result<ModelOutput> {
        let request = self.build_request(previous, retiring);
        debug!(
            "Requesting summary of {} messages (previous summary: {})",
            retiring.len(),
            previous.is_some()
        );

        let output = invoke_with_timeout(self.invoker.as_ref(), request, self.timeout)
            .await
            .map_err(|e| BedrockError::SummarizationError(e.to_string()))?;

        if output.text.trim().is_empty() {
            return Err(BedrockError::SummarizationError(
                "Model returned an empty summary".to_string(),
            ));
        }
        Ok(ModelOutput {
            text: output.text.trim().to_string(),
            usage: output.usage,
        })
    }

    /// Request asking the model to merge `previous` with the retiring transcript.
    pub fn build_request(&self, previous: Option<&Message>, retiring: &[Message]) -> ModelRequest {
        let mut body = String::new();
        match previous {
            Some(summary) => {
                body.push_str("Existing summary:\n");
                body.push_str(summary.content());
            }
            None => body.push_str("Existing summary:\n(none)"),
        }
        body.push_str("\n\nNew transcript:\n");
        body.push_str(&render_transcript(retiring));
        body.push_str("\n\nWrite the updated summary.");

        ModelRequest {
            system_prompt: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            messages: vec![PromptMessage::user(body)],
            params: self.params.clone(),
        }
    }
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let speaker = match message.role() {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::System => "System",
                MessageRole::Summary => "Summary",
            };
            format!("{speaker}: {}", message.content())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopInvoker;

    #[async_trait]
    impl ModelInvoker for NoopInvoker {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelOutput> {
            Ok(ModelOutput::text("   "))
        }
    }

    fn summarizer() -> Summarizer {
        let mut params = GenerationParams::new("model", 256);
        params.response_format = ResponseFormat::Json;
        Summarizer::new(Arc::new(NoopInvoker), params, None)
    }

    #[test]
    fn test_request_merges_previous_summary_and_transcript() {
        let previous = Message::new(MessageRole::Summary, "User likes Rust.", 3);
        let retiring = vec![
            Message::new(MessageRole::User, "Why Rust?", 4),
            Message::new(MessageRole::Assistant, "Memory safety.", 5),
        ];

        let request = summarizer().build_request(Some(&previous), &retiring);
        assert_eq!(request.system_prompt.as_deref(), Some(SUMMARY_SYSTEM_PROMPT));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.params.response_format, ResponseFormat::Text);
        assert_eq!(request.params.max_tokens, 256);

        let body = &request.messages[0].content;
        assert!(body.contains("User likes Rust."));
        assert!(body.contains("User: Why Rust?\nAssistant: Memory safety."));
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let retiring = vec![Message::new(MessageRole::User, "hi", 0)];
        let result = summarizer().summarize(None, &retiring).await;
        assert!(matches!(result, Err(BedrockError::SummarizationError(_))));
    }

    struct SlowInvoker;

    #[async_trait]
    impl ModelInvoker for SlowInvoker {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ModelOutput::text("too late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_as_summarization_error() {
        let summarizer = Summarizer::new(
            Arc::new(SlowInvoker),
            GenerationParams::new("model", 256),
            Some(Duration::from_secs(2)),
        );
        let retiring = vec![Message::new(MessageRole::User, "hi", 1)];

        match summarizer.summarize(None, &retiring).await {
            Err(BedrockError::SummarizationError(message)) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("expected summarization error, got {other:?}"),
        }
    }
}
