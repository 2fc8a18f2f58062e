use bedrock_core::{Message, Result, TokenStatistics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Running bookkeeping for one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: Uuid,
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub turn_count: usize,
    pub summarization_count: usize,
    pub failed_summarizations: usize,
    #[serde(default)]
    pub token_usage: TokenStatistics,
}

impl ConversationMetadata {
    /// Start a new conversation record
    pub fn new(model_id: String, system_prompt: Option<String>) -> Self {
        let now = Utc::now();
        let message_count = usize::from(system_prompt.is_some());

        Self {
            id: Uuid::new_v4(),
            model_id,
            system_prompt,
            created_at: now,
            updated_at: now,
            message_count,
            turn_count: 0,
            summarization_count: 0,
            failed_summarizations: 0,
            token_usage: TokenStatistics::default(),
        }
    }

    /// Count a committed user/assistant exchange.
    pub fn record_turn(&mut self, usage: Option<&TokenStatistics>) {
        self.turn_count += 1;
        self.message_count += 2;
        self.record_usage(usage);
    }

    /// Count a summary that replaced part of the window.
    pub fn record_summarization(&mut self, usage: Option<&TokenStatistics>) {
        self.summarization_count += 1;
        self.record_usage(usage);
    }

    pub fn record_failed_summarization(&mut self) {
        self.failed_summarizations += 1;
        self.updated_at = Utc::now();
    }

    fn record_usage(&mut self, usage: Option<&TokenStatistics>) {
        if let Some(usage) = usage {
            self.token_usage.accumulate(usage);
        }
        self.updated_at = Utc::now();
    }
}

/// Point-in-time copy of a conversation, suitable for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub metadata: ConversationMetadata,
    pub system_prompt: Option<String>,
    pub summary: Option<Message>,
    pub active_window: Vec<Message>,
    pub full_history: Vec<Message>,
    pub exported_at: DateTime<Utc>,
}

impl ConversationSnapshot {
    /// Pretty-printed JSON form of the snapshot.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot as JSON to `path`, replacing any existing file.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!("Exported conversation {} to {}", self.metadata.id, path.display());
        Ok(())
    }
}
