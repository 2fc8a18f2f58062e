use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::Region;
use aws_sdk_bedrockruntime as bedrock;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, SdkError};
use aws_sdk_bedrockruntime::operation::converse::ConverseError;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message, SystemContentBlock, TokenUsage,
};
use bedrock_config::{AwsSettings, ClientConfig};
use bedrock_conversation::{ConversationConfig, ConversationManager};
use bedrock_core::{
    BedrockError, GenerationOverrides, GenerationParams, MessageRole, ModelInvoker, ModelOutput,
    ModelRequest, ModelResponse, PromptMessage, Result, TokenStatistics,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

mod streaming;
use streaming::collect_text_stream;

pub struct BedrockClient {
    client: bedrock::Client,
    region: Region,
    config: Arc<ClientConfig>,
    defaults: GenerationParams,
}

impl BedrockClient {
    /// Validate `config` and build a Converse client for its region and profile.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let aws_config = Self::build_aws_config(&config.aws).await;
        let client = bedrock::Client::new(&aws_config);
        let region = aws_config
            .region()
            .cloned()
            .unwrap_or_else(|| Region::new(config.aws.region.clone()));
        let defaults = config.generation_defaults();

        Ok(Self {
            client,
            region,
            config: Arc::new(config),
            defaults,
        })
    }

    async fn build_aws_config(settings: &AwsSettings) -> aws_config::SdkConfig {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(settings.max_attempts));

        if let Some(profile) = &settings.profile {
            info!("Using AWS profile: {}", profile);
            config_loader = config_loader.profile_name(profile);
        }

        let aws_config = config_loader.load().await;

        debug!("AWS config loaded for region: {}", settings.region);
        aws_config
    }

    /// One Converse call for a fully formed request.
    pub async fn converse(&self, request: ModelRequest) -> Result<ModelOutput> {
        let payload = ConversePayload::from_request(&request);
        let messages = to_bedrock_messages(&payload.turns)?;

        let response = self
            .client
            .converse()
            .model_id(&request.params.model_id)
            .set_messages(Some(messages))
            .set_system(payload.system_blocks())
            .inference_config(inference_config(&request.params))
            .send()
            .await
            .map_err(converse_error)?;

        let message = response
            .output()
            .and_then(|output| output.as_message().ok())
            .ok_or_else(|| BedrockError::InvocationError("No message in response".into()))?;

        let text = message
            .content()
            .iter()
            .filter_map(|block| block.as_text().ok())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("");

        debug!("Converse stop reason: {:?}", response.stop_reason());

        Ok(ModelOutput {
            text,
            usage: response.usage().map(usage_to_stats),
        })
    }

    /// Stream a Converse call, handing each text delta to `on_chunk` as it
    /// arrives. Returns the assembled output once the stream ends.
    pub async fn converse_stream(
        &self,
        request: ModelRequest,
        on_chunk: impl FnMut(&str) + Send,
    ) -> Result<ModelOutput> {
        let payload = ConversePayload::from_request(&request);
        let messages = to_bedrock_messages(&payload.turns)?;

        let stream_output = self
            .client
            .converse_stream()
            .model_id(&request.params.model_id)
            .set_messages(Some(messages))
            .set_system(payload.system_blocks())
            .inference_config(inference_config(&request.params))
            .send()
            .await
            .map_err(|e| {
                BedrockError::InvocationError(format!(
                    "Bedrock streaming error: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let stream = async_stream::stream! {
            let mut event_stream = stream_output.stream;
            loop {
                match event_stream.recv().await {
                    Ok(Some(output)) => {
                        yield Ok(output);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(DisplayErrorContext(e).to_string());
                        break;
                    }
                }
            }
        };

        collect_text_stream(stream, on_chunk).await
    }

    /// Single stateless prompt, shaped by the response format in `overrides`.
    pub async fn invoke_model(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: GenerationOverrides,
    ) -> Result<ModelResponse> {
        let request = self.single_prompt_request(prompt, system_prompt, &overrides)?;
        let format = request.params.response_format.clone();
        let output = self.invoke(request).await?;
        bedrock_structured::parse_response(&output.text, &format)
    }

    /// Single stateless prompt with the reply streamed to `on_chunk`.
    pub async fn invoke_model_with_streaming(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: GenerationOverrides,
        on_chunk: impl FnMut(&str) + Send,
    ) -> Result<ModelOutput> {
        let request = self.single_prompt_request(prompt, system_prompt, &overrides)?;
        self.converse_stream(request, on_chunk).await
    }

    /// Start a conversation that talks to this client. `system_prompt`
    /// replaces the one from the configuration when given.
    pub fn create_conversation(
        self: &Arc<Self>,
        system_prompt: Option<String>,
    ) -> Result<ConversationManager> {
        let mut config = ConversationConfig::from_client_config(&self.config);
        if let Some(prompt) = system_prompt {
            config = config.with_system_prompt(prompt);
        }
        let invoker: Arc<dyn ModelInvoker> = Arc::clone(self) as Arc<dyn ModelInvoker>;
        ConversationManager::new(invoker, config)
    }

    fn single_prompt_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: &GenerationOverrides,
    ) -> Result<ModelRequest> {
        if prompt.trim().is_empty() {
            return Err(BedrockError::InvalidRequest("Prompt cannot be empty".into()));
        }
        Ok(ModelRequest {
            system_prompt: system_prompt.map(str::to_string),
            messages: vec![PromptMessage::user(prompt)],
            params: self.defaults.merge(overrides),
        })
    }

    /// Region the client sends requests to
    pub fn get_region(&self) -> &str {
        self.region.as_ref()
    }
}

#[async_trait]
impl ModelInvoker for BedrockClient {
    #[instrument(skip(self, request), fields(model = %request.params.model_id, messages = request.messages.len()))]
    async fn invoke(&self, request: ModelRequest) -> Result<ModelOutput> {
        self.converse(request).await
    }
}

/// A request reshaped for Converse: system and summary entries become system
/// blocks, since Converse turns may only be user or assistant.
#[derive(Debug, Clone, PartialEq)]
struct ConversePayload {
    system: Vec<String>,
    turns: Vec<PromptMessage>,
}

impl ConversePayload {
    fn from_request(request: &ModelRequest) -> Self {
        let mut system = Vec::new();
        if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            system.push(prompt.to_string());
        }

        let mut turns = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            match message.role {
                MessageRole::System | MessageRole::Summary => system.push(message.content.clone()),
                MessageRole::User | MessageRole::Assistant => turns.push(message.clone()),
            }
        }

        if let Some(instruction) = bedrock_structured::instruction_for(&request.params.response_format)
        {
            system.push(instruction);
        }

        Self { system, turns }
    }

    fn system_blocks(&self) -> Option<Vec<SystemContentBlock>> {
        if self.system.is_empty() {
            return None;
        }
        Some(
            self.system
                .iter()
                .cloned()
                .map(SystemContentBlock::Text)
                .collect(),
        )
    }
}

fn to_bedrock_messages(turns: &[PromptMessage]) -> Result<Vec<Message>> {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                MessageRole::Assistant => ConversationRole::Assistant,
                _ => ConversationRole::User,
            };
            Message::builder()
                .role(role)
                .content(ContentBlock::Text(turn.content.clone()))
                .build()
                .map_err(|e| BedrockError::InvocationError(format!("Failed to build message: {e}")))
        })
        .collect()
}

fn inference_config(params: &GenerationParams) -> InferenceConfiguration {
    let mut builder = InferenceConfiguration::builder()
        .max_tokens(i32::try_from(params.max_tokens).unwrap_or(i32::MAX));
    if let Some(temperature) = params.temperature {
        builder = builder.temperature(temperature);
    }
    if let Some(top_p) = params.top_p {
        builder = builder.top_p(top_p);
    }
    builder.build()
}

fn usage_to_stats(usage: &TokenUsage) -> TokenStatistics {
    TokenStatistics::new(
        usage.input_tokens().max(0) as usize,
        usage.output_tokens().max(0) as usize,
    )
}

fn converse_error<R>(err: SdkError<ConverseError, R>) -> BedrockError
where
    R: std::fmt::Debug,
{
    let cause = match err.as_service_error() {
        Some(e) if e.is_throttling_exception() => "request throttled",
        Some(e) if e.is_access_denied_exception() => "access denied",
        Some(e) if e.is_validation_exception() => "request rejected by validation",
        Some(e) if e.is_model_timeout_exception() => "model timed out",
        Some(_) => "model service error",
        None => "transport error",
    };
    BedrockError::InvocationError(format!("{cause}: {}", DisplayErrorContext(&err)))
}
