//! Rule Aliases
//!
//! Optional user-facing labels for rule ids, stored independently of the
//! rules themselves. Lifecycle is tied to, but not enforced transactionally
//! with, the owning rule: deleting a rule triggers alias deletion through
//! the router, and a dangling alias for a vanished rule id is tolerated
//! and simply unused.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{KeyValueStore, StoreKeys};
use reqthru_core::RuleId;

/// One alias entry, shaped for the message contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAlias {
    pub id: RuleId,
    pub alias: String,
}

/// Alias CRUD over the key-value store.
pub struct AliasStore {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
}

impl AliasStore {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    pub async fn list(&self) -> Result<Vec<RuleAlias>> {
        let keys = self.store.keys_with_prefix(&self.keys.namespace()).await?;
        let mut aliases = Vec::new();
        for key in keys {
            let Some(id) = self.keys.alias_rule_id(&key) else {
                continue;
            };
            if let Some(value) = self.store.get(&key).await? {
                if let Some(alias) = value.as_str() {
                    aliases.push(RuleAlias {
                        id,
                        alias: alias.to_string(),
                    });
                }
            }
        }
        aliases.sort_by_key(|a| a.id);
        Ok(aliases)
    }

    pub async fn update(&self, id: RuleId, alias: &str) -> Result<()> {
        self.store.set(&self.keys.alias(id), json!(alias)).await
    }

    /// Idempotent: deleting a missing alias is a no-op.
    pub async fn delete(&self, id: RuleId) -> Result<()> {
        self.store.remove(&self.keys.alias(id)).await
    }
}
