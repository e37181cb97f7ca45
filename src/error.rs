use thiserror::Error;

/// Failure while moving or casting the tensors of a [`crate::relocate::Nested`] value.
#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("cannot convert host array of dtype {dtype}: {reason}")]
    Conversion { dtype: String, reason: String },

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Failure reported by a [`crate::chat::ChatTemplate`] implementation.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("missing field `chat_template`")]
    MissingTemplate,

    #[error("invalid chat template: {0}")]
    Syntax(String),

    #[error("chat template error: {0}")]
    Render(String),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub type RelocateResult<T> = Result<T, RelocateError>;
pub type PromptResult<T> = Result<T, PromptError>;
