use bedrock_core::{BedrockError, GenerationParams, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod env_substitution;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_id")]
    pub id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub summarization: SummarizationPolicy,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: Option<f32>,
}

/// When the active window is compressed into a summary, and how much of it
/// survives verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizationPolicy {
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default)]
    pub unit: ThresholdUnit,
    #[serde(default)]
    pub trigger: TriggerComparison,
    #[serde(default = "default_keep_recent_pairs")]
    pub keep_recent_pairs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdUnit {
    Messages,
    #[default]
    Pairs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerComparison {
    /// Summarize once the window holds more messages than the limit.
    #[default]
    Exceeds,
    /// Summarize as soon as the window holds the limit.
    Reaches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Zero disables the timeout.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BedrockError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text; empty text yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let expanded = env_substitution::substitute_env_vars(yaml)?;

        let config: ClientConfig = if expanded.trim().is_empty() {
            ClientConfig::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| BedrockError::ConfigError(format!("Failed to parse YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.id.is_empty() {
            return Err(BedrockError::ConfigError("Model cannot be empty".into()));
        }
        if self.model.max_tokens == 0 {
            return Err(BedrockError::ConfigError("max_tokens must be greater than zero".into()));
        }
        if self.aws.region.is_empty() {
            return Err(BedrockError::ConfigError("AWS region cannot be empty".into()));
        }
        check_unit_interval("temperature", self.model.temperature)?;
        check_unit_interval("top_p", self.model.top_p)?;
        check_unit_interval("summary_temperature", self.conversation.summary_temperature)?;
        if self.conversation.summary_max_tokens == 0 {
            return Err(BedrockError::ConfigError(
                "summary_max_tokens must be greater than zero".into(),
            ));
        }
        self.conversation.summarization.validate()
    }

    /// Client-wide generation defaults; per-call overrides are merged over these.
    pub fn generation_defaults(&self) -> GenerationParams {
        let mut params = GenerationParams::new(self.model.id.clone(), self.model.max_tokens);
        params.temperature = self.model.temperature;
        params.top_p = self.model.top_p;
        params
    }

    /// Parameters for the compression call that folds old turns into the summary.
    pub fn summary_params(&self) -> GenerationParams {
        let mut params = GenerationParams::new(
            self.model.id.clone(),
            self.conversation.summary_max_tokens,
        );
        params.temperature = self.conversation.summary_temperature;
        params
    }

    /// `~/.bedrock-chat/config.yaml`, honouring `HOME_DIR` before `HOME`.
    pub fn default_config_path() -> PathBuf {
        let home_dir = env::var("HOME_DIR")
            .unwrap_or_else(|_| env::var("HOME").unwrap_or_else(|_| ".".to_string()));
        PathBuf::from(home_dir).join(".bedrock-chat").join("config.yaml")
    }
}

impl SummarizationPolicy {
    /// The threshold expressed in messages.
    pub fn message_limit(&self) -> usize {
        match self.unit {
            ThresholdUnit::Messages => self.threshold,
            ThresholdUnit::Pairs => self.threshold * 2,
        }
    }

    /// True when a window of `window_len` messages must be compressed.
    pub fn should_summarize(&self, window_len: usize) -> bool {
        match self.trigger {
            TriggerComparison::Exceeds => window_len > self.message_limit(),
            TriggerComparison::Reaches => window_len >= self.message_limit(),
        }
    }

    /// Messages kept verbatim after a summarization.
    pub fn retained_messages(&self) -> usize {
        self.keep_recent_pairs * 2
    }

    /// Reject policies that could leave the window above its limit.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(BedrockError::ConfigError(
                "Summarization threshold must be greater than zero".into(),
            ));
        }
        if self.retained_messages() > self.message_limit() {
            return Err(BedrockError::ConfigError(format!(
                "keep_recent_pairs ({}) keeps more messages than the summarization limit ({})",
                self.keep_recent_pairs,
                self.message_limit()
            )));
        }
        Ok(())
    }
}

impl TimeoutSettings {
    /// Timeout for a single model call, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_secs > 0).then(|| Duration::from_secs(self.request_secs))
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            id: default_model_id(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: None,
        }
    }
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            summarization: SummarizationPolicy::default(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_temperature: default_summary_temperature(),
        }
    }
}

impl Default for SummarizationPolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            unit: ThresholdUnit::default(),
            trigger: TriggerComparison::default(),
            keep_recent_pairs: default_keep_recent_pairs(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
        }
    }
}

fn check_unit_interval(name: &str, value: Option<f32>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(BedrockError::ConfigError(format!(
            "{name} must be between 0.0 and 1.0"
        ))),
        _ => Ok(()),
    }
}

fn default_model_id() -> String { "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string() }
fn default_max_tokens() -> u32 { 4000 }
fn default_temperature() -> Option<f32> { Some(0.7) }
fn default_region() -> String { "us-west-2".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_summary_max_tokens() -> u32 { 1024 }
fn default_summary_temperature() -> Option<f32> { Some(0.2) }
fn default_threshold() -> usize { 2 }
fn default_keep_recent_pairs() -> usize { 1 }
fn default_request_secs() -> u64 { 120 }
