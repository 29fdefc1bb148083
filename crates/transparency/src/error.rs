use thiserror::Error;

use vra_core::StoreError;

#[derive(Debug, Error)]
pub enum TransparencyError {
    #[error("auction '{0}' not found")]
    AuctionNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Unreadable key registry or malformed key material.
    #[error("key error: {0}")]
    Key(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
