//! Service error type

use historian_alerts::AlertError;
use historian_model::ModelError;
use historian_query::QueryError;
use historian_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HissrvError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unserviceable bus request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Unknown alert: {0}")]
    UnknownAlert(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request {0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HissrvError>;

impl HissrvError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the failure may clear up on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Transport(_) | Self::Timeout(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

impl From<figment::Error> for HissrvError {
    fn from(err: figment::Error) -> Self {
        Self::config(err.to_string())
    }
}
