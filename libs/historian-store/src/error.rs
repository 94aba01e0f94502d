//! Error types for historian-store

use historian_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Location already exists: {0}")]
    LocationExists(String),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[cfg(feature = "sqlite-backend")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "metrics-backend")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Errors worth retrying on the next cycle (connection loss, timeouts)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            #[cfg(feature = "sqlite-backend")]
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            #[cfg(feature = "metrics-backend")]
            StoreError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
