//! reqthru Core Library
//!
//! Host-independent primitives for the reqthru request rewriter: the
//! declarative rule model shared with the platform's dynamic rule table,
//! the fail-open header value extractor, and URL match patterns used to
//! scope the request-rate monitor.

/// Declarative rule model
pub mod rules;

/// Header value extraction from fetched bodies
pub mod extract;

/// URL match pattern parsing and matching
pub mod match_pattern;

/// Error types for core operations
pub mod error;

pub use error::CoreError;
pub use extract::match_result;
pub use match_pattern::MatchPattern;
pub use rules::{
    HeaderInfo, HeaderOperation, Rule, RuleAction, RuleCondition, RuleId, TabId,
    DISABLED_HEADER_MARKER, MIRROR_ID_OFFSET, NO_TAB_ID,
};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
