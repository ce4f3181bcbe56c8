//! Error types for histogram aggregation

use thiserror::Error;

/// Result type alias for histogram aggregation operations
pub type Result<T> = std::result::Result<T, HistogramError>;

/// Main error type for histogram aggregation
#[derive(Error, Debug)]
pub enum HistogramError {
    /// A column or partial state does not carry the declared value type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The declared value type has no codec
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Allocation failed or the memory limit was reached
    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation is illegal in the aggregator's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::collections::TryReserveError> for HistogramError {
    fn from(e: std::collections::TryReserveError) -> Self {
        HistogramError::ResourceExhausted(e.to_string())
    }
}

impl From<hashbrown::TryReserveError> for HistogramError {
    fn from(e: hashbrown::TryReserveError) -> Self {
        HistogramError::ResourceExhausted(format!("hash table growth failed: {:?}", e))
    }
}
