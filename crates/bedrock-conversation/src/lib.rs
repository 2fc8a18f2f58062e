pub mod manager;
pub mod metadata;
pub mod state;
pub mod summarizer;

pub use manager::{ConversationConfig, ConversationManager};
pub use metadata::{ConversationMetadata, ConversationSnapshot};
pub use state::ConversationState;
pub use summarizer::{Summarizer, SUMMARY_SYSTEM_PROMPT};
