//! Error types shared by every hntr crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HntrError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HntrError {
    /// Whether the referenced entity is gone (retrying cannot help).
    pub fn is_not_found(&self) -> bool {
        matches!(self, HntrError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, HntrError>;
