//! Error types for the Cadence data store.

use thiserror::Error;

/// Result type alias for data-store operations.
pub type DataStoreResult<T> = Result<T, DataStoreError>;

/// Main error type for the data-store engine.
#[derive(Error, Debug, Clone)]
pub enum DataStoreError {
    /// A task or family definition referenced during generation is absent.
    #[error("Missing definition element: {0}")]
    MissingDefinition(String),

    /// A namespace has no entry in the first-parent ancestry map.
    #[error("Missing ancestry for namespace: {0}")]
    MissingAncestry(String),

    /// An identifier failed to decode against the identifier grammar.
    #[error("Malformed identifier: {0}")]
    MalformedId(String),

    /// Publishable payload encoding failed.
    #[error("Delta encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for DataStoreError {
    fn from(err: serde_json::Error) -> Self {
        DataStoreError::Encode(err.to_string())
    }
}
