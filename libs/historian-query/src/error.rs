//! Error types for read requests

use historian_model::ModelError;
use historian_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Request shape cannot be served (bad grid parameters etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No cache entry or no backend binding for the tag
    #[error("Tag not bound to any storage: {0}")]
    TagNotBound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
