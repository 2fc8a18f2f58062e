use bedrock_config::SummarizationPolicy;
use bedrock_core::{BedrockError, Message, MessageRole, PromptMessage, Result};
use tracing::debug;

/// Label placed in front of the summary when it is replayed to the model.
pub const SUMMARY_CONTEXT_PREFIX: &str = "Summary of the conversation so far:";

/// Memory of a single conversation.
///
/// `full_history` only ever grows. `window` holds the messages replayed
/// verbatim to the model, and `summary` stands in for everything that has
/// been retired from the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    system_prompt: Option<String>,
    summary: Option<Message>,
    window: Vec<Message>,
    full_history: Vec<Message>,
    next_sequence: u64,
}

/// A user message that has been numbered but not yet recorded.
#[derive(Debug, Clone)]
pub struct StagedTurn {
    user: Message,
}

/// The oldest window messages selected for folding into the summary.
#[derive(Debug, Clone)]
pub struct Retirement {
    pub previous_summary: Option<Message>,
    pub messages: Vec<Message>,
}

impl ConversationState {
    /// Empty memory; the system prompt, when given, is recorded as message 0.
    pub fn new(system_prompt: Option<String>) -> Self {
        let mut state = Self {
            system_prompt: system_prompt.clone(),
            ..Self::default()
        };
        if let Some(prompt) = system_prompt {
            state.full_history.push(Message::new(MessageRole::System, prompt, 0));
            state.next_sequence = 1;
        }
        state
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Summary standing in for the retired messages.
    pub fn summary(&self) -> Option<&Message> {
        self.summary.as_ref()
    }

    /// Messages replayed verbatim on the next turn.
    pub fn window(&self) -> &[Message] {
        &self.window
    }

    /// Every recorded message in order.
    pub fn full_history(&self) -> &[Message] {
        &self.full_history
    }

    /// True until the first turn has been committed.
    pub fn is_empty(&self) -> bool {
        !self
            .full_history
            .iter()
            .any(|m| m.role() == MessageRole::User)
    }

    /// Number a user message without recording it.
    pub fn stage(&self, user_text: impl Into<String>) -> StagedTurn {
        StagedTurn {
            user: Message::new(MessageRole::User, user_text, self.next_sequence),
        }
    }

    /// Messages to send for `staged`: the summary (as a leading system entry),
    /// then the window in order, then the new user message.
    pub fn compose_prompt(&self, staged: &StagedTurn) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(self.window.len() + 2);

        if let Some(summary) = &self.summary {
            messages.push(PromptMessage::new(
                MessageRole::System,
                format!("{SUMMARY_CONTEXT_PREFIX}\n{}", summary.content()),
            ));
        }
        messages.extend(self.window.iter().map(Message::to_prompt));
        messages.push(staged.user.to_prompt());

        debug!(
            "Composed prompt: summary={}, window={}, total={}",
            self.summary.is_some(),
            self.window.len(),
            messages.len()
        );
        messages
    }

    /// Record a completed exchange. Both messages land in the window and the
    /// full history together or not at all.
    pub fn commit(&mut self, staged: StagedTurn, reply: impl Into<String>) -> Result<()> {
        if staged.user.sequence_number() != self.next_sequence {
            return Err(BedrockError::InvalidRequest(format!(
                "Staged turn {} is stale; conversation is at {}",
                staged.user.sequence_number(),
                self.next_sequence
            )));
        }

        let assistant = Message::new(
            MessageRole::Assistant,
            reply,
            staged.user.sequence_number() + 1,
        );

        self.window.push(staged.user.clone());
        self.window.push(assistant.clone());
        self.full_history.push(staged.user);
        self.full_history.push(assistant);
        self.next_sequence += 2;

        debug!(
            "Committed turn: window={}, full_history={}",
            self.window.len(),
            self.full_history.len()
        );
        Ok(())
    }

    /// The messages `policy` wants retired, if the window is over its limit.
    pub fn pending_retirement(&self, policy: &SummarizationPolicy) -> Option<Retirement> {
        if !policy.should_summarize(self.window.len()) {
            return None;
        }

        let retire_count = self
            .window
            .len()
            .saturating_sub(policy.retained_messages());
        if retire_count == 0 {
            return None;
        }

        Some(Retirement {
            previous_summary: self.summary.clone(),
            messages: self.window[..retire_count].to_vec(),
        })
    }

    /// Replace the summary and drop the retired messages from the window.
    /// Returns false, leaving the state untouched, if the window no longer
    /// starts with the retired messages.
    pub fn apply_summary(&mut self, retirement: &Retirement, summary_text: impl Into<String>) -> bool {
        let Some(last) = retirement.messages.last() else {
            return false;
        };

        let still_leading = self.window.len() >= retirement.messages.len()
            && self
                .window
                .iter()
                .zip(&retirement.messages)
                .all(|(current, retired)| current.sequence_number() == retired.sequence_number());
        if !still_leading {
            return false;
        }

        self.summary = Some(Message::new(
            MessageRole::Summary,
            summary_text,
            last.sequence_number(),
        ));
        self.window.drain(..retirement.messages.len());
        true
    }

    /// Forget the live memory. The full history is kept.
    pub fn clear(&mut self) {
        self.summary = None;
        self.window.clear();
    }
}
