//! Platform Adapters
//!
//! Thin traits over the two host facilities the core writes to: the
//! dynamic rule table (batch add/remove, evaluated by the platform's own
//! request pipeline) and tab control (reload). In-memory implementations
//! model the platform faithfully enough for the integration suites: the
//! rule table is capped and rejects id collisions, and one batch applies
//! removes before adds.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BackgroundError, Result};
use reqthru_core::{Rule, RuleId, TabId};

/// The platform's dynamic rule table.
#[async_trait]
pub trait RuleTable: Send + Sync {
    /// Every rule currently registered, mirrors included.
    async fn all_rules(&self) -> Result<Vec<Rule>>;

    /// Apply one batch: removes first, then adds. All-or-nothing.
    async fn update(&self, remove_ids: Vec<RuleId>, add: Vec<Rule>) -> Result<()>;
}

/// Tab control surface of the platform.
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn reload_tab(&self, tab_id: TabId, bypass_cache: bool) -> Result<()>;
}

/// In-memory dynamic rule table with platform-like validation.
#[derive(Debug, Clone)]
pub struct InMemoryRuleTable {
    rules: Arc<DashMap<RuleId, Rule>>,
    max_rules: usize,
}

impl InMemoryRuleTable {
    pub fn new(max_rules: usize) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            max_rules,
        }
    }

    /// Direct lookup, for assertions in tests.
    pub fn rule(&self, id: RuleId) -> Option<Rule> {
        self.rules.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for InMemoryRuleTable {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[async_trait]
impl RuleTable for InMemoryRuleTable {
    async fn all_rules(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn update(&self, remove_ids: Vec<RuleId>, add: Vec<Rule>) -> Result<()> {
        // Validate the whole batch before touching the table so a rejected
        // batch leaves it unchanged.
        let mut seen = std::collections::HashSet::new();
        for rule in &add {
            if !seen.insert(rule.id) {
                return Err(BackgroundError::RuleTable(format!(
                    "duplicate rule id {} in batch",
                    rule.id
                )));
            }
            if self.rules.contains_key(&rule.id) && !remove_ids.contains(&rule.id) {
                return Err(BackgroundError::RuleTable(format!(
                    "rule id {} already registered",
                    rule.id
                )));
            }
        }

        let removed = remove_ids
            .iter()
            .filter(|id| self.rules.contains_key(id))
            .count();
        let resulting = self.rules.len() - removed + add.len();
        if resulting > self.max_rules {
            return Err(BackgroundError::RuleTable(format!(
                "rule table capacity exceeded: {} > {}",
                resulting, self.max_rules
            )));
        }

        for id in &remove_ids {
            self.rules.remove(id);
        }
        for rule in add {
            debug!("Registering rule {}", rule.id);
            self.rules.insert(rule.id, rule);
        }
        Ok(())
    }
}

/// Tab host that records reload requests instead of performing them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTabHost {
    reloads: Arc<DashMap<TabId, bool>>,
}

impl RecordingTabHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tab was asked to reload, and with which cache mode.
    pub fn reloaded(&self, tab_id: TabId) -> Option<bool> {
        self.reloads.get(&tab_id).map(|e| *e.value())
    }
}

#[async_trait]
impl TabHost for RecordingTabHost {
    async fn reload_tab(&self, tab_id: TabId, bypass_cache: bool) -> Result<()> {
        self.reloads.insert(tab_id, bypass_cache);
        Ok(())
    }
}
