use thiserror::Error;

use vra_core::{StoreError, WindowError};

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Invalid setting value, from a file or the environment.
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A job argument that cannot be acted on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Window(#[from] WindowError),
    /// A query or write that the job cannot proceed without.
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// Evidence ids requested for a dispute kit that have no stored delta.
    #[error("no delta found for evidence id(s): {}", .0.join(", "))]
    MissingEvidence(Vec<String>),
    /// Redaction left a sensitive pattern behind.
    #[error("redaction incomplete: {0}")]
    Redaction(String),
    #[error("evidence serialization failed: {0}")]
    Serialize(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for ReconError {
    fn from(e: csv::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

impl From<serde_json::Error> for ReconError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}
