//! Rule Repository
//!
//! The single owner of the platform's dynamic rule table. All additions
//! and removals go through [`RuleRepository::apply`], which maintains the
//! mirrored-rule invariant: a rule scoped by `initiatorDomains` is
//! registered twice, once as authored and once at `id + MIRROR_ID_OFFSET`
//! with the same domains as `requestDomains`, because the platform matches
//! the two condition shapes differently. Mirrors never reach the UI-facing
//! read path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::monitor::BlockState;
use crate::platform::RuleTable;
use reqthru_core::{Rule, RuleId, TabId, MIRROR_ID_OFFSET};

/// A batch write against the rule table, as sent by the UI collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub remove_rule_ids: Vec<RuleId>,
    #[serde(default)]
    pub add_rules: Vec<Rule>,
}

/// Structured result of a batch write, shaped for the message contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Mediates every write to the dynamic rule table.
pub struct RuleRepository {
    table: Arc<dyn RuleTable>,
    block_state: Arc<BlockState>,
}

impl RuleRepository {
    pub fn new(table: Arc<dyn RuleTable>, block_state: Arc<BlockState>) -> Self {
        Self { table, block_state }
    }

    /// Primary rules only: mirrors are filtered out so the caller never
    /// sees duplicated entries.
    pub async fn list(&self) -> Result<Vec<Rule>> {
        let rules = self.table.all_rules().await?;
        Ok(rules.into_iter().filter(|r| !r.is_mirror()).collect())
    }

    /// Look up one primary rule by id.
    pub async fn get(&self, id: RuleId) -> Result<Option<Rule>> {
        Ok(self.list().await?.into_iter().find(|r| r.id == id))
    }

    /// Apply one batch: every removed id also removes its mirror slot, and
    /// every added rule with initiator domains gets a fresh mirror. The
    /// underlying platform batch is treated as atomic; on rejection the
    /// outcome carries the platform's message and nothing is rolled back
    /// here.
    pub async fn apply(&self, update: RuleUpdate) -> ApplyOutcome {
        let mut remove_ids = Vec::with_capacity(update.remove_rule_ids.len() * 2);
        for id in &update.remove_rule_ids {
            remove_ids.push(*id);
            remove_ids.push(*id + MIRROR_ID_OFFSET);
        }

        let mut add = Vec::with_capacity(update.add_rules.len() * 2);
        for rule in update.add_rules {
            if let Some(mirror) = rule.mirror() {
                debug!("Mirroring rule {} at {}", rule.id, mirror.id);
                add.push(mirror);
            }
            add.push(rule);
        }

        if let Err(e) = self.table.update(remove_ids, add).await {
            return ApplyOutcome::fail(e.to_string());
        }

        // A block rule removed by the user counts as a manual unblock.
        for id in &update.remove_rule_ids {
            if let Ok(tab_id) = TabId::try_from(*id) {
                if self.block_state.clear_blocked(tab_id) {
                    info!("Rule {} removed, unblocking tab {}", id, tab_id);
                }
            }
        }

        ApplyOutcome::ok()
    }
}
