//! Error types for the Cadence wire schema.

use thiserror::Error;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while parsing or encoding schema types.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    /// Status string outside the canonical vocabulary.
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    /// Payload encoding failed.
    #[error("Payload encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::Encode(err.to_string())
    }
}
