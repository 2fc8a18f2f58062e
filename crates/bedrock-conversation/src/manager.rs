use bedrock_config::{ClientConfig, SummarizationPolicy};
use bedrock_core::{
    BedrockError, GenerationOverrides, GenerationParams, Message, ModelInvoker, ModelOutput,
    ModelRequest, ModelResponse, Result,
};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::metadata::{ConversationMetadata, ConversationSnapshot};
use crate::state::ConversationState;
use crate::summarizer::Summarizer;

/// Immutable settings a conversation is created with.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub system_prompt: Option<String>,
    pub defaults: GenerationParams,
    pub summary_params: GenerationParams,
    pub policy: SummarizationPolicy,
    pub request_timeout: Option<Duration>,
}

impl ConversationConfig {
    /// Settings with the default summarization policy and no timeout.
    pub fn new(defaults: GenerationParams) -> Self {
        let mut summary_params = defaults.clone();
        summary_params.max_tokens = 1024;
        summary_params.top_p = None;

        Self {
            system_prompt: None,
            defaults,
            summary_params,
            policy: SummarizationPolicy::default(),
            request_timeout: None,
        }
    }

    /// Derive conversation settings from a loaded client configuration.
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            system_prompt: config.conversation.system_prompt.clone(),
            defaults: config.generation_defaults(),
            summary_params: config.summary_params(),
            policy: config.conversation.summarization,
            request_timeout: config.timeouts.request_timeout(),
        }
    }

    /// Set the system prompt recorded as the first message.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Replace the summarization policy. Checked when the manager is built.
    pub fn with_policy(mut self, policy: SummarizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound every model call made by the conversation.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Owns one conversation's memory and drives each turn against a model.
///
/// A `send` is a transaction: the user message is staged, the model is
/// called, and only a successful (and, for structured formats, valid) reply
/// commits both messages. Failure, timeout or cancellation leaves the
/// recorded history exactly as it was.
pub struct ConversationManager {
    invoker: Arc<dyn ModelInvoker>,
    config: Arc<ConversationConfig>,
    summarizer: Summarizer,
    // serializes whole turns; held across the model calls
    turn_lock: Mutex<()>,
    state: RwLock<ConversationState>,
    metadata: RwLock<ConversationMetadata>,
}

impl ConversationManager {
    /// Create a new conversation manager. Fails if the summarization policy
    /// could not keep the window within its limit.
    pub fn new(invoker: Arc<dyn ModelInvoker>, config: ConversationConfig) -> Result<Self> {
        config.policy.validate()?;

        let summarizer = Summarizer::new(
            Arc::clone(&invoker),
            config.summary_params.clone(),
            config.request_timeout,
        );
        let state = ConversationState::new(config.system_prompt.clone());
        let metadata =
            ConversationMetadata::new(config.defaults.model_id.clone(), config.system_prompt.clone());

        info!("Started new conversation: {}", metadata.id);
        Ok(Self {
            invoker,
            config: Arc::new(config),
            summarizer,
            turn_lock: Mutex::new(()),
            state: RwLock::new(state),
            metadata: RwLock::new(metadata),
        })
    }

    /// Conversation identifier
    pub fn id(&self) -> Uuid {
        self.read_metadata().id
    }

    /// Settings this conversation was created with.
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Send a user message with the default generation parameters.
    pub async fn send(&self, user_text: impl Into<String>) -> Result<ModelResponse> {
        self.send_with(user_text, GenerationOverrides::default()).await
    }

    /// Send a user message, merging `overrides` over the defaults for this
    /// call only.
    #[instrument(skip(self, user_text, overrides), fields(conversation_id = %self.id()))]
    pub async fn send_with(
        &self,
        user_text: impl Into<String>,
        overrides: GenerationOverrides,
    ) -> Result<ModelResponse> {
        let user_text = user_text.into();
        if user_text.trim().is_empty() {
            return Err(BedrockError::InvalidRequest(
                "User message cannot be empty".to_string(),
            ));
        }

        let _turn = self.turn_lock.lock().await;

        let params = self.config.defaults.merge(&overrides);
        let format = params.response_format.clone();
        let timeout = overrides.timeout.or(self.config.request_timeout);

        let (staged, request) = {
            let state = self.read_state();
            let staged = state.stage(user_text);
            let request = ModelRequest {
                system_prompt: state.system_prompt().map(str::to_string),
                messages: state.compose_prompt(&staged),
                params,
            };
            (staged, request)
        };

        let output = invoke_with_timeout(self.invoker.as_ref(), request, timeout).await?;
        let response = bedrock_structured::parse_response(&output.text, &format)?;

        self.write_state().commit(staged, output.text)?;
        self.write_metadata().record_turn(output.usage.as_ref());

        self.maybe_summarize().await;
        Ok(response)
    }

    /// Compress the oldest window messages if the policy asks for it. Failures
    /// are logged and counted, never returned; the next turn tries again.
    async fn maybe_summarize(&self) {
        let retirement = self.read_state().pending_retirement(&self.config.policy);
        let Some(retirement) = retirement else {
            return;
        };

        info!(
            "Summarizing {} messages out of the active window",
            retirement.messages.len()
        );

        match self
            .summarizer
            .summarize(retirement.previous_summary.as_ref(), &retirement.messages)
            .await
        {
            Ok(output) => {
                let applied = self.write_state().apply_summary(&retirement, output.text);
                if applied {
                    self.write_metadata().record_summarization(output.usage.as_ref());
                    debug!("Summary updated");
                } else {
                    debug!("Discarding summary; the window changed while it was produced");
                }
            }
            Err(e) => {
                warn!("Summarization failed, will retry on the next turn: {}", e);
                self.write_metadata().record_failed_summarization();
            }
        }
    }

    /// Messages that will be replayed verbatim on the next turn.
    pub fn history(&self) -> Vec<Message> {
        self.read_state().window().to_vec()
    }

    /// Every message ever recorded in this conversation.
    pub fn full_history(&self) -> Vec<Message> {
        self.read_state().full_history().to_vec()
    }

    /// The current summary of retired messages, if any.
    pub fn summary(&self) -> Option<Message> {
        self.read_state().summary().cloned()
    }

    /// Counters and token usage so far.
    pub fn metadata(&self) -> ConversationMetadata {
        self.read_metadata().clone()
    }

    /// Drop the active window and summary. Waits for any in-flight turn.
    pub async fn clear(&self) {
        let _turn = self.turn_lock.lock().await;
        self.write_state().clear();
        self.write_metadata().updated_at = Utc::now();
        info!("Cleared active memory for conversation {}", self.id());
    }

    /// Copy of the whole conversation for export.
    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.read_state();
        ConversationSnapshot {
            metadata: self.metadata(),
            system_prompt: state.system_prompt().map(str::to_string),
            summary: state.summary().cloned(),
            active_window: state.window().to_vec(),
            full_history: state.full_history().to_vec(),
            exported_at: Utc::now(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConversationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConversationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_metadata(&self) -> RwLockReadGuard<'_, ConversationMetadata> {
        self.metadata.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metadata(&self) -> RwLockWriteGuard<'_, ConversationMetadata> {
        self.metadata.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) async fn invoke_with_timeout(
    invoker: &dyn ModelInvoker,
    request: ModelRequest,
    timeout: Option<Duration>,
) -> Result<ModelOutput> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, invoker.invoke(request))
            .await
            .map_err(|_| BedrockError::TimeoutError(limit))?,
        None => invoker.invoke(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock_config::{ThresholdUnit, TriggerComparison};
    use bedrock_core::{MessageRole, ResponseFormat, TokenStatistics};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        pub Invoker {}

        #[async_trait]
        impl ModelInvoker for Invoker {
            async fn invoke(&self, request: ModelRequest) -> Result<ModelOutput>;
        }
    }

    fn config() -> ConversationConfig {
        ConversationConfig::new(GenerationParams::new("test-model", 512))
    }

    #[tokio::test]
    async fn test_send_records_turn() {
        let mut invoker = MockInvoker::new();
        invoker
            .expect_invoke()
            .with(always())
            .times(1)
            .returning(|request| {
                assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
                assert_eq!(request.messages.len(), 1);
                assert_eq!(request.messages[0].role, MessageRole::User);
                Ok(ModelOutput::text("Hello!").with_usage(TokenStatistics::new(7, 2)))
            });

        let manager =
            ConversationManager::new(Arc::new(invoker), config().with_system_prompt("Be brief."))
                .unwrap();
        let response = manager.send("Hi").await.unwrap();

        assert_eq!(response, ModelResponse::Text("Hello!".into()));
        assert_eq!(manager.history().len(), 2);
        assert_eq!(manager.full_history().len(), 3);

        let metadata = manager.metadata();
        assert_eq!(metadata.turn_count, 1);
        assert_eq!(metadata.message_count, 3);
        assert_eq!(metadata.token_usage.total_tokens, 9);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_model_call() {
        let mut invoker = MockInvoker::new();
        invoker.expect_invoke().times(0);

        let manager = ConversationManager::new(Arc::new(invoker), config()).unwrap();
        let result = manager.send("   ").await;

        assert!(matches!(result, Err(BedrockError::InvalidRequest(_))));
        assert!(manager.full_history().is_empty());
    }

    #[tokio::test]
    async fn test_invocation_error_rolls_back() {
        let mut invoker = MockInvoker::new();
        invoker
            .expect_invoke()
            .times(1)
            .returning(|_| Err(BedrockError::InvocationError("throttled".into())));

        let manager = ConversationManager::new(Arc::new(invoker), config()).unwrap();
        let result = manager.send("Hello?").await;

        assert!(matches!(result, Err(BedrockError::InvocationError(_))));
        assert!(manager.history().is_empty());
        assert!(manager.full_history().is_empty());
        assert_eq!(manager.metadata().turn_count, 0);
    }

    #[tokio::test]
    async fn test_overrides_reach_the_invoker() {
        let mut invoker = MockInvoker::new();
        invoker.expect_invoke().times(1).returning(|request| {
            assert_eq!(request.params.model_id, "test-model");
            assert_eq!(request.params.temperature, Some(0.1));
            assert_eq!(request.params.response_format, ResponseFormat::Json);
            Ok(ModelOutput::text(r#"{"languages": ["Rust"]}"#))
        });

        let manager = ConversationManager::new(Arc::new(invoker), config()).unwrap();
        let overrides = GenerationOverrides::new()
            .with_temperature(0.1)
            .with_response_format(ResponseFormat::Json);
        let response = manager.send_with("List languages", overrides).await.unwrap();

        assert_eq!(response.value().unwrap()["languages"][0], "Rust");
        assert_eq!(manager.config().defaults.temperature, None);
    }

    #[test]
    fn test_policy_that_cannot_bound_the_window_is_rejected() {
        let mut invoker = MockInvoker::new();
        invoker.expect_invoke().times(0);

        let policy = SummarizationPolicy {
            threshold: 1,
            unit: ThresholdUnit::Pairs,
            trigger: TriggerComparison::Exceeds,
            keep_recent_pairs: 3,
        };
        let result = ConversationManager::new(Arc::new(invoker), config().with_policy(policy));

        match result {
            Err(BedrockError::ConfigError(message)) => {
                assert!(message.contains("keep_recent_pairs"));
            }
            Err(other) => panic!("expected config error, got {other:?}"),
            Ok(_) => panic!("policy keeping 6 messages under a limit of 2 was accepted"),
        }
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let invoker = MockInvoker::new();
        let policy = SummarizationPolicy {
            threshold: 0,
            ..SummarizationPolicy::default()
        };
        let result = ConversationManager::new(Arc::new(invoker), config().with_policy(policy));
        assert!(matches!(result, Err(BedrockError::ConfigError(_))));
    }
}
