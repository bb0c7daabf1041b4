//! Background Core Error Types

use thiserror::Error;

/// Main error type for background coordination operations
#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rule table rejected batch: {0}")]
    RuleTable(String),

    #[error("Tab reload failed: {0}")]
    TabReload(String),

    #[error("Invalid slot id '{0}': expected \"<ruleId>_<headerIndex>\"")]
    InvalidSlotId(String),

    #[error(transparent)]
    Core(#[from] reqthru_core::CoreError),
}

/// Result type alias for background operations
pub type Result<T> = std::result::Result<T, BackgroundError>;
