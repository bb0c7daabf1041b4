//! Key-Value Store Adapter
//!
//! The durable string-keyed store the host platform provides (survives
//! process restarts, cleared on fresh install). All persisted state lives
//! under one namespace prefix; each concern keeps a disjoint key shape to
//! avoid collisions:
//!
//! - `<prefix>_block` → bool, monitor enabled
//! - `<prefix>_blockUrl` → array of match patterns
//! - `<prefix>_<ruleId>_alias` → string
//! - `<prefix>_<ruleId>_<headerIndex>_<field>` → auto-update slot fields

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use reqthru_core::RuleId;

/// Async string-keyed persistent store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// All stored keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    /// Remove every key starting with `prefix` (fresh-install hook).
    async fn clear_prefix(&self, prefix: &str) -> Result<()>;
}

/// In-memory store used by tests and as the default embedding adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, for assertions in tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

/// Builder for namespaced storage keys.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The bare namespace prefix, for whole-namespace operations.
    pub fn namespace(&self) -> String {
        format!("{}_", self.prefix)
    }

    pub fn block(&self) -> String {
        format!("{}_block", self.prefix)
    }

    pub fn block_url(&self) -> String {
        format!("{}_blockUrl", self.prefix)
    }

    pub fn alias(&self, rule_id: RuleId) -> String {
        format!("{}_{}_alias", self.prefix, rule_id)
    }

    /// Parse a rule id back out of an alias key.
    pub fn alias_rule_id(&self, key: &str) -> Option<RuleId> {
        key.strip_prefix(&self.namespace())?
            .strip_suffix("_alias")?
            .parse()
            .ok()
    }

    pub fn slot_field(&self, rule_id: RuleId, header_index: usize, field: &str) -> String {
        format!("{}_{}_{}_{}", self.prefix, rule_id, header_index, field)
    }

    /// Parse `(ruleId, headerIndex)` out of a slot field key with the given
    /// field suffix.
    pub fn slot_of_field(&self, key: &str, field: &str) -> Option<(RuleId, usize)> {
        let middle = key
            .strip_prefix(&self.namespace())?
            .strip_suffix(&format!("_{field}"))?;
        let (rule_id, header_index) = middle.split_once('_')?;
        Some((rule_id.parse().ok()?, header_index.parse().ok()?))
    }
}
