//! Core Error Types

use thiserror::Error;

/// Main error type for core rule and pattern operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid match pattern: {0}")]
    Pattern(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
