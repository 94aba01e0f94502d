//! Model Layer Error Types

use thiserror::Error;

/// Result type for historian-model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Value type code outside the known set
    #[error("Unknown value type code: {0}")]
    UnknownValueType(u8),

    /// Timestamp could not be parsed
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Location name rejected by validation
    #[error("Invalid location name: {0}")]
    InvalidLocation(String),

    /// Malformed data point on the wire
    #[error("Invalid data point: {0}")]
    InvalidPoint(String),
}
