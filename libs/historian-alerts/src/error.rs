//! Error types for alert handling

use historian_model::ModelError;
use historian_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Unknown alert: {0}")]
    UnknownAlert(String),

    /// Alert has no alarm-history location
    #[error("Alert not bound to any storage: {0}")]
    NotBound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, AlertError>;
