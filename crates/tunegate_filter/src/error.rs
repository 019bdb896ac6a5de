//! Error types for the filter pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Filter error type
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Scorer error: {0}")]
    Scorer(String),

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File is not part of the train set: {0}")]
    UnknownFile(String),

    #[error("File '{path}' is already {status}")]
    AlreadyClassified { path: String, status: &'static str },

    #[error("Step counter for '{phase}' already at its total of {total}")]
    StepOverflow { phase: String, total: u64 },

    #[error("{0}")]
    Interrupted(String),
}

impl FilterError {
    /// Whether this error is the interruption path rather than a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, FilterError::Interrupted(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FilterError>;
