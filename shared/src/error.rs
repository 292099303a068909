use thiserror::Error;

use crate::openai_client::PromptError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported state schema: {0}")]
    Schema(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("AI request failed: {0}")]
    Ai(#[from] PromptError),
}

pub type Result<T> = std::result::Result<T, AppError>;
