//! Configuration types and utilities

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static background core configuration.
/// These settings are set at startup and do not change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Namespace prefix for every persisted key
    pub store_prefix: String,
    /// Request-rate monitor settings
    pub monitor: MonitorConfig,
    /// Capacity of the platform's dynamic rule table
    pub max_rules: usize,
    /// Timeout for remote value fetches
    pub fetch_timeout: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            store_prefix: "reqThru".to_string(),
            monitor: MonitorConfig::default(),
            max_rules: 5000,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Request-rate monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Requests per window that trip the block for a single tab
    pub threshold: u32,
    /// Length of the counting window; also the self-healing reset period
    pub window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 1000,
            window: Duration::from_secs(60),
        }
    }
}
