//! Jinja chat templates from `tokenizer_config.json`.
//!
//! [`TokenizerConfig`] reads the special tokens and the `chat_template`
//! field; [`JinjaChatTemplate`] renders it with MiniJinja plus the
//! Python-compat extensions HuggingFace templates rely on
//! (`raise_exception`, `.strip()`, `.startswith()`, `tojson`, ...).

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{context, Environment, Error, ErrorKind};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::chat::prompt::{ChatEntry, ChatTemplate};
use crate::config::SpecialTokenIds;
use crate::error::TemplateError;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenObj {
    pub content: String,
    #[serde(default)]
    pub lstrip: bool,
    #[serde(default)]
    pub rstrip: bool,
    #[serde(default)]
    pub normalized: bool,
    #[serde(default)]
    pub single_word: bool,
}

/// Special tokens are written either as a bare string or as an object.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Token {
    String(String),
    TokenObj(TokenObj),
}

impl Token {
    pub fn content(&self) -> &str {
        match self {
            Token::String(s) => s,
            Token::TokenObj(obj) => &obj.content,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub tokenizer_class: Option<String>,
    #[serde(default)]
    pub bos_token: Option<Token>,
    #[serde(default)]
    pub eos_token: Option<Token>,
    #[serde(default)]
    pub pad_token: Option<Token>,
    #[serde(default)]
    pub unk_token: Option<Token>,
    #[serde(default)]
    pub chat_template: Option<String>,
}

impl TokenizerConfig {
    /// Reads a `tokenizer_config.json`. When it has no `chat_template`, a
    /// `chat_template.jinja` next to it is used instead.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let mut config = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse {}", file.display()))?;

        if config.chat_template.is_none() {
            let jinja_path = file
                .parent()
                .unwrap_or(Path::new("."))
                .join("chat_template.jinja");
            if jinja_path.exists() {
                config.chat_template = Some(
                    std::fs::read_to_string(&jinja_path)
                        .with_context(|| format!("Failed to read {}", jinja_path.display()))?,
                );
            }
        }
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    fn token_str(token: &Option<Token>) -> Option<&str> {
        token.as_ref().map(Token::content)
    }

    pub fn bos(&self) -> Option<&str> {
        Self::token_str(&self.bos_token)
    }

    pub fn eos(&self) -> Option<&str> {
        Self::token_str(&self.eos_token)
    }

    pub fn pad(&self) -> Option<&str> {
        Self::token_str(&self.pad_token)
    }

    pub fn unk(&self) -> Option<&str> {
        Self::token_str(&self.unk_token)
    }

    /// Resolves the pad / eos / bos ids in `tokenizer`'s vocabulary.
    pub fn special_token_ids(&self, tokenizer: &Tokenizer) -> SpecialTokenIds {
        let id = |tok: Option<&str>| tok.and_then(|t| tokenizer.token_to_id(t));
        SpecialTokenIds {
            pad: id(self.pad()),
            eos: id(self.eos()),
            bos: id(self.bos()),
        }
    }
}

/// A HuggingFace-style Jinja chat template.
#[derive(Debug, Clone)]
pub struct JinjaChatTemplate {
    source: String,
    bos_token: String,
    eos_token: String,
    pad_token: String,
    unk_token: String,
}

impl JinjaChatTemplate {
    /// Compiles `source` once to surface syntax errors early.
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        environment()
            .template_from_str(&source)
            .map_err(|e| TemplateError::Syntax(e.to_string()))?;
        Ok(Self {
            source,
            bos_token: String::new(),
            eos_token: String::new(),
            pad_token: String::new(),
            unk_token: String::new(),
        })
    }

    pub fn from_config(config: &TokenizerConfig) -> Result<Self, TemplateError> {
        let source = config
            .chat_template
            .as_deref()
            .ok_or(TemplateError::MissingTemplate)?;
        let mut template = Self::new(source)?;
        template.bos_token = config.bos().unwrap_or_default().to_string();
        template.eos_token = config.eos().unwrap_or_default().to_string();
        template.pad_token = config.pad().unwrap_or_default().to_string();
        template.unk_token = config.unk().unwrap_or_default().to_string();
        Ok(template)
    }

    pub fn with_bos_token(mut self, bos: impl Into<String>) -> Self {
        self.bos_token = bos.into();
        self
    }

    pub fn with_eos_token(mut self, eos: impl Into<String>) -> Self {
        self.eos_token = eos.into();
        self
    }
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    minijinja_contrib::add_to_environment(&mut env);
    env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    env.add_function("raise_exception", |msg: String| -> Result<String, Error> {
        Err(Error::new(ErrorKind::InvalidOperation, msg))
    });
    env
}

impl ChatTemplate for JinjaChatTemplate {
    fn render(&self, entries: &[ChatEntry], add_generation_prompt: bool) -> Result<String, TemplateError> {
        let env = environment();
        let tmpl = env
            .template_from_str(&self.source)
            .map_err(|e| TemplateError::Syntax(e.to_string()))?;
        tmpl.render(context! {
            messages => entries,
            bos_token => self.bos_token,
            eos_token => self.eos_token,
            pad_token => self.pad_token,
            unk_token => self.unk_token,
            add_generation_prompt => add_generation_prompt
        })
        .map_err(|e| TemplateError::Render(e.to_string()))
    }

    fn bos_token(&self) -> Option<&str> {
        Some(self.bos_token.as_str()).filter(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::prompt::{ChatRole, ConversationTurn, PromptBuilder};
    use std::str::FromStr;

    const CHATML: &str = "{% for message in messages %}<|im_start|>{{ message.role }}\n{{ message.content }}<|im_end|>\n{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";

    // Gemma-style: refuses system turns, leads with the BOS token.
    const NO_SYSTEM: &str = "{{ bos_token }}{% for message in messages %}{% if message.role == 'system' %}{{ raise_exception('System role not supported') }}{% endif %}<{{ message.role }}>{{ message.content.strip() }}\n{% endfor %}{% if add_generation_prompt %}<model>{% endif %}";

    // ── TokenizerConfig ──

    #[test]
    fn config_reads_string_and_object_tokens() {
        let json = r#"{
            "tokenizer_class": "PreTrainedTokenizerFast",
            "bos_token": "<s>",
            "eos_token": {"content": "</s>", "lstrip": false, "rstrip": false, "normalized": false, "single_word": false},
            "chat_template": "{{ messages | length }}"
        }"#;
        let config = TokenizerConfig::from_json_str(json).unwrap();
        assert_eq!(config.bos(), Some("<s>"));
        assert_eq!(config.eos(), Some("</s>"));
        assert_eq!(config.pad(), None);
        assert_eq!(config.chat_template.as_deref(), Some("{{ messages | length }}"));
    }

    #[test]
    fn special_token_ids_from_vocab() {
        let tokenizer = Tokenizer::from_str(
            r#"{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": null,
                "post_processor": null,
                "decoder": null,
                "model": {"type": "WordLevel", "vocab": {"<unk>": 0, "<s>": 1, "</s>": 2}, "unk_token": "<unk>"}
            }"#,
        )
        .unwrap();
        let config = TokenizerConfig::from_json_str(r#"{"bos_token": "<s>", "eos_token": "</s>"}"#).unwrap();
        let ids = config.special_token_ids(&tokenizer);
        assert_eq!(ids, SpecialTokenIds { pad: None, eos: Some(2), bos: Some(1) });
    }

    // ── JinjaChatTemplate ──

    #[test]
    fn missing_template_is_reported() {
        let config = TokenizerConfig::default();
        assert!(matches!(
            JinjaChatTemplate::from_config(&config),
            Err(TemplateError::MissingTemplate)
        ));
    }

    #[test]
    fn syntax_error_is_reported() {
        assert!(matches!(
            JinjaChatTemplate::new("{% for %}"),
            Err(TemplateError::Syntax(_))
        ));
    }

    #[test]
    fn chatml_render() {
        let template = JinjaChatTemplate::new(CHATML).unwrap();
        let entries = [
            ChatEntry::new(ChatRole::System, "sys"),
            ChatEntry::new(ChatRole::User, "hi"),
        ];
        let prompt = template.render(&entries, true).unwrap();
        assert_eq!(
            prompt,
            "<|im_start|>system\nsys<|im_end|>\n<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn builder_tokens_reach_the_template() {
        let template = JinjaChatTemplate::new(
            "{{ bos_token }}{% for message in messages %}{{ message.content }}{{ eos_token }}{% endfor %}",
        )
        .unwrap();
        assert_eq!(template.bos_token(), None);

        let template = template.with_bos_token("<s>").with_eos_token("</s>");
        assert_eq!(template.bos_token(), Some("<s>"));
        let entries = [ChatEntry::new(ChatRole::User, "hi")];
        assert_eq!(template.render(&entries, false).unwrap(), "<s>hi</s>");

        let turns = [ConversationTurn::new("hi", "")];
        let prompt = PromptBuilder::new(true, true)
            .build(&template, None, &turns)
            .unwrap();
        assert_eq!(prompt, "hi</s>");
    }

    #[test]
    fn system_rejecting_template_falls_back() {
        let config = TokenizerConfig {
            bos_token: Some(Token::String("<bos>".into())),
            chat_template: Some(NO_SYSTEM.into()),
            ..Default::default()
        };
        let template = JinjaChatTemplate::from_config(&config).unwrap();
        let entries = [ChatEntry::new(ChatRole::System, "sys")];
        assert!(matches!(
            template.render(&entries, true),
            Err(TemplateError::Render(_))
        ));

        let turns = [ConversationTurn::new("  hello  ", "")];
        let prompt = PromptBuilder::new(true, false)
            .build(&template, Some("sys"), &turns)
            .unwrap();
        assert_eq!(prompt, "<bos><user>hello\n<model>");

        let prompt = PromptBuilder::new(true, true)
            .build(&template, Some("sys"), &turns)
            .unwrap();
        assert_eq!(prompt, "<user>hello\n<model>");
    }
}
