use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chat::markdown::restore_markdown;
use crate::error::{PromptResult, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged entry handed to a chat template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
}

impl ChatEntry {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A user utterance and the assistant reply to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    #[serde(default)]
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// Rebuilds a conversation from chat-display history, where code blocks
    /// were rendered as HTML and newlines as `<br>`.
    pub fn from_display_history<S: AsRef<str>>(system: Option<String>, history: &[[S; 2]]) -> Self {
        let turns = history
            .iter()
            .map(|[user, assistant]| {
                ConversationTurn::new(
                    restore_markdown(user.as_ref()),
                    restore_markdown(assistant.as_ref()),
                )
            })
            .collect();
        Self { system, turns }
    }

    pub fn build_prompt(
        &self,
        builder: &PromptBuilder,
        template: &dyn ChatTemplate,
    ) -> PromptResult<String> {
        builder.build(template, self.system.as_deref(), &self.turns)
    }
}

/// Linearizes role-tagged entries into a single prompt string.
///
/// This is the model-specific part of prompting; the rest of the crate only
/// decides which entries go in.
pub trait ChatTemplate: Send + Sync {
    fn render(&self, entries: &[ChatEntry], add_generation_prompt: bool) -> Result<String, TemplateError>;

    /// Beginning-of-sequence marker the template may emit, if any.
    fn bos_token(&self) -> Option<&str> {
        None
    }
}

impl<F> ChatTemplate for F
where
    F: Fn(&[ChatEntry], bool) -> Result<String, TemplateError> + Send + Sync,
{
    fn render(&self, entries: &[ChatEntry], add_generation_prompt: bool) -> Result<String, TemplateError> {
        self(entries, add_generation_prompt)
    }
}

/// Builds prompts from conversations through a [`ChatTemplate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    /// Leave out the assistant entry of the last turn when it is empty, so the
    /// prompt ends right before the model's reply.
    pub truncate_trailing_empty: bool,
    /// Strip one leading BOS marker from the rendered prompt.
    pub remove_bos_token: bool,
}

impl PromptBuilder {
    pub fn new(truncate_trailing_empty: bool, remove_bos_token: bool) -> Self {
        Self {
            truncate_trailing_empty,
            remove_bos_token,
        }
    }

    pub fn entries(&self, system: Option<&str>, turns: &[ConversationTurn]) -> Vec<ChatEntry> {
        let mut entries = Vec::with_capacity(turns.len() * 2 + 1);
        if let Some(system) = system {
            entries.push(ChatEntry::new(ChatRole::System, system));
        }
        let last = turns.len().saturating_sub(1);
        for (i, turn) in turns.iter().enumerate() {
            entries.push(ChatEntry::new(ChatRole::User, turn.user.as_str()));
            let skip = self.truncate_trailing_empty && i == last && turn.assistant.is_empty();
            if !skip {
                entries.push(ChatEntry::new(ChatRole::Assistant, turn.assistant.as_str()));
            }
        }
        entries
    }

    pub fn build(
        &self,
        template: &dyn ChatTemplate,
        system: Option<&str>,
        turns: &[ConversationTurn],
    ) -> PromptResult<String> {
        let entries = self.entries(system, turns);
        let prompt = match template.render(&entries, true) {
            Ok(prompt) => prompt,
            Err(e) if entries.iter().any(|m| m.role == ChatRole::System) => {
                warn!("Failed to apply chat template ({e}). Removing system message.");
                let entries: Vec<ChatEntry> = entries
                    .into_iter()
                    .filter(|m| m.role != ChatRole::System)
                    .collect();
                template.render(&entries, true)?
            }
            Err(e) => return Err(e.into()),
        };

        if self.remove_bos_token {
            if let Some(bos) = template.bos_token().filter(|b| !b.is_empty()) {
                if let Some(stripped) = prompt.strip_prefix(bos) {
                    debug!("Removing bos_token from prompt");
                    return Ok(stripped.to_string());
                }
            }
        }
        Ok(prompt)
    }
}
