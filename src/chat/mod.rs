//! Prompt construction and chat-display text handling.

pub mod markdown;
pub mod prompt;
pub mod template;

pub use markdown::{
    extract_code_fences, html_to_markdown, markdown_to_html, normalize_linebreaks, restore_markdown,
    CodeFence,
};
pub use prompt::{ChatEntry, ChatRole, ChatTemplate, Conversation, ConversationTurn, PromptBuilder};
pub use template::{JinjaChatTemplate, TokenizerConfig};
