//! Error types shared by Courtside crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Courtside operations
pub type Result<T> = std::result::Result<T, CourtsideError>;

/// Errors raised while reading raw extracts and configuration
#[derive(Error, Debug)]
pub enum CourtsideError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required raw extract is absent. Detected before any write happens.
    #[error("Required file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    MalformedInput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CourtsideError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error means the raw inputs are unusable (missing or unreadable)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingInput(_) | Self::ReadInput { .. } | Self::MalformedInput { .. }
        )
    }
}
