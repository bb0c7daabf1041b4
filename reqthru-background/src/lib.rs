//! reqthru Background Library
//!
//! The background coordination core of the reqthru request rewriter: owns
//! persistent rule state, reconciles it with the platform's declarative
//! rule table, keeps auto-updated header values fresh, and blocks runaway
//! tabs. The popup UI is an external collaborator reached only through the
//! message router; the platform's own request pipeline consumes the rule
//! table this core maintains.

pub mod alias;
pub mod autoupdate;
pub mod background;
pub mod fetcher;
pub mod monitor;
pub mod platform;
pub mod repository;
pub mod router;
pub mod store;

/// Configuration types
pub mod config;

/// Error types for background operations
pub mod error;

/// Logging setup
pub mod logging;

pub use alias::{AliasStore, RuleAlias};
pub use autoupdate::{AutoUpdateConfig, AutoUpdateScheduler, AutoUpdateSlot, SlotId};
pub use background::Background;
pub use config::{BackgroundConfig, MonitorConfig};
pub use error::BackgroundError;
pub use fetcher::{HttpFetcher, ValueFetcher};
pub use monitor::{BlockState, RequestMonitor};
pub use platform::{InMemoryRuleTable, RecordingTabHost, RuleTable, TabHost};
pub use repository::{ApplyOutcome, RuleRepository, RuleUpdate};
pub use router::{Command, Dispatch, MessageRouter};
pub use store::{KeyValueStore, MemoryStore, StoreKeys};

/// Result type alias for background operations
pub type Result<T> = std::result::Result<T, BackgroundError>;
