//! Auto-Update Scheduler
//!
//! Keeps header values fresh. Each header entry that has ever opted into
//! auto-update owns a *slot* (addressed `"<ruleId>_<headerIndex>"`) whose
//! configuration is persisted one key per field. A refresh fetches the
//! slot's endpoint, extracts the value, and pushes the updated rule
//! through the repository.
//!
//! There are no wall-clock timers surviving process restarts: tab
//! activation is the sole scheduling tick. On every activation the
//! scheduler scans persisted slots and refreshes those whose revalidation
//! interval has elapsed, so freshness is "at most one interval stale as
//! observed by the next tab switch". Background refreshes fail silently
//! to the log; there is no UI surface to show them on.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{BackgroundError, Result};
use crate::fetcher::ValueFetcher;
use crate::repository::{RuleRepository, RuleUpdate};
use crate::store::{KeyValueStore, StoreKeys};
use reqthru_core::{match_result, RuleId};

const FIELD_IS_AUTO: &str = "isAutoUpdate";
const FIELD_API_URL: &str = "apiUrl";
const FIELD_MATCHER: &str = "regMatcher";
const FIELD_FLAG: &str = "regFlag";
const FIELD_PLACER: &str = "regPlacer";
const FIELD_INTERVAL: &str = "revalidationInterval";
const FIELD_LAST_UPDATED: &str = "lastUpdatedAt";

const ALL_FIELDS: [&str; 7] = [
    FIELD_IS_AUTO,
    FIELD_API_URL,
    FIELD_MATCHER,
    FIELD_FLAG,
    FIELD_PLACER,
    FIELD_INTERVAL,
    FIELD_LAST_UPDATED,
];

/// Address of one auto-update slot: a (rule, header entry) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub rule_id: RuleId,
    pub header_index: usize,
}

impl SlotId {
    /// Parse the `"<ruleId>_<headerIndex>"` wire form.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || BackgroundError::InvalidSlotId(raw.to_string());
        let (rule_id, header_index) = raw.split_once('_').ok_or_else(invalid)?;
        Ok(Self {
            rule_id: rule_id.parse().map_err(|_| invalid())?,
            header_index: header_index.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.rule_id, self.header_index)
    }
}

/// Wire payload of the `setAutoUpdate` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdateConfig {
    pub rule_item_id: String,
    pub api_url: String,
    #[serde(default)]
    pub match_pattern: String,
    #[serde(default)]
    pub match_flags: String,
    #[serde(default)]
    pub placement_template: String,
    pub revalidation_interval_ms: u64,
}

/// A slot's persisted state, reassembled from its field keys.
#[derive(Debug, Clone)]
pub struct AutoUpdateSlot {
    pub slot: SlotId,
    pub auto_enabled: bool,
    pub api_url: String,
    pub match_pattern: String,
    pub match_flags: String,
    pub placement_template: String,
    pub revalidation_interval_ms: u64,
    pub last_updated_at_ms: Option<i64>,
}

/// Scheduler for slot refreshes. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AutoUpdateScheduler {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    repository: Arc<RuleRepository>,
    fetcher: Arc<dyn ValueFetcher>,
    pending: Arc<DashMap<SlotId, JoinHandle<()>>>,
}

impl AutoUpdateScheduler {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: StoreKeys,
        repository: Arc<RuleRepository>,
        fetcher: Arc<dyn ValueFetcher>,
    ) -> Self {
        Self {
            store,
            keys,
            repository,
            fetcher,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Persist a slot's configuration with auto-update enabled, then run
    /// one refresh cycle immediately.
    pub async fn set_auto_update(&self, config: AutoUpdateConfig) -> Result<()> {
        let slot = SlotId::parse(&config.rule_item_id)?;

        self.set_field(slot, FIELD_IS_AUTO, json!(true)).await?;
        self.set_field(slot, FIELD_API_URL, json!(config.api_url))
            .await?;
        self.set_field(slot, FIELD_MATCHER, json!(config.match_pattern))
            .await?;
        self.set_field(slot, FIELD_FLAG, json!(config.match_flags))
            .await?;
        self.set_field(slot, FIELD_PLACER, json!(config.placement_template))
            .await?;
        self.set_field(slot, FIELD_INTERVAL, json!(config.revalidation_interval_ms))
            .await?;

        self.refresh(slot).await;
        Ok(())
    }

    /// Disable a slot and forget its configuration. Idempotent; also
    /// cancels a pending refresh task if one is in flight.
    pub async fn clear_auto_update(&self, slot: SlotId) -> Result<()> {
        if let Some((_, handle)) = self.pending.remove(&slot) {
            handle.abort();
        }
        for field in ALL_FIELDS {
            self.store
                .remove(&self.keys.slot_field(slot.rule_id, slot.header_index, field))
                .await?;
        }
        Ok(())
    }

    /// Forget every persisted slot.
    pub async fn clear_all_auto_update(&self) -> Result<()> {
        for slot in self.persisted_slots().await? {
            self.clear_auto_update(slot).await?;
        }
        Ok(())
    }

    /// Forget all slots owned by one rule (rule deletion path).
    pub async fn clear_for_rule(&self, rule_id: RuleId) -> Result<()> {
        for slot in self.persisted_slots().await? {
            if slot.rule_id == rule_id {
                self.clear_auto_update(slot).await?;
            }
        }
        Ok(())
    }

    /// The scheduling tick: on tab activation, refresh every enabled slot
    /// whose revalidation interval has elapsed. Refreshes run as spawned
    /// tasks so a slow endpoint never delays the activation handler.
    pub async fn reconcile_on_tab_activate(&self) -> Result<()> {
        // reap handles of refreshes that already finished; a finished task
        // must never knock out a live successor, so tasks do not remove
        // their own entries
        self.pending.retain(|_, handle| !handle.is_finished());

        let now = Utc::now().timestamp_millis();
        for slot_id in self.persisted_slots().await? {
            let Some(slot) = self.load_slot(slot_id).await? else {
                continue;
            };
            if !slot.auto_enabled {
                continue;
            }
            let elapsed = now - slot.last_updated_at_ms.unwrap_or(0);
            let interval_ms = i64::try_from(slot.revalidation_interval_ms).unwrap_or(i64::MAX);
            if elapsed < interval_ms {
                continue;
            }

            debug!("Slot {} is stale ({} ms), refreshing", slot_id, elapsed);
            let scheduler = self.clone();
            let handle = tokio::spawn(async move {
                scheduler.refresh(slot_id).await;
            });
            if let Some(stale) = self.pending.insert(slot_id, handle) {
                stale.abort();
            }
        }
        Ok(())
    }

    /// Number of refresh tasks still in flight.
    pub fn pending_refreshes(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// One refresh cycle. Every failure is a logged no-op: refreshes run
    /// unattended, so nothing is surfaced to the user synchronously.
    pub async fn refresh(&self, slot_id: SlotId) {
        let slot = match self.load_slot(slot_id).await {
            Ok(Some(slot)) if slot.auto_enabled => slot,
            Ok(_) => {
                debug!("Slot {} is gone or disabled, skipping refresh", slot_id);
                return;
            }
            Err(e) => {
                warn!("Loading slot {} failed: {}", slot_id, e);
                return;
            }
        };

        let rule = match self.repository.get(slot_id.rule_id).await {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!("Rule {} no longer exists, skipping refresh", slot_id.rule_id);
                return;
            }
            Err(e) => {
                warn!("Looking up rule {} failed: {}", slot_id.rule_id, e);
                return;
            }
        };

        let header_disabled = rule
            .action
            .request_headers()
            .and_then(|headers| headers.get(slot_id.header_index))
            .map(|h| h.is_disabled());
        match header_disabled {
            None => {
                debug!("Slot {} has no owning header anymore, skipping", slot_id);
                return;
            }
            Some(true) => {
                debug!("Header of slot {} is disabled, skipping refresh", slot_id);
                return;
            }
            Some(false) => {}
        }

        let Some(body) = self.fetcher.fetch_text(&slot.api_url).await else {
            warn!("Refresh of slot {} got no value from {}", slot_id, slot.api_url);
            return;
        };
        let value = match_result(
            &body,
            &slot.match_pattern,
            &slot.match_flags,
            &slot.placement_template,
        );

        let mut updated = rule;
        if let Some(header) = updated
            .action
            .request_headers_mut()
            .and_then(|headers| headers.get_mut(slot_id.header_index))
        {
            header.value = value;
        }

        let outcome = self
            .repository
            .apply(RuleUpdate {
                remove_rule_ids: vec![updated.id],
                add_rules: vec![updated],
            })
            .await;
        if !outcome.success {
            warn!(
                "Applying refreshed rule for slot {} failed: {}",
                slot_id,
                outcome.error.unwrap_or_default()
            );
            return;
        }

        let now = Utc::now().timestamp_millis();
        if let Err(e) = self.set_field(slot_id, FIELD_LAST_UPDATED, json!(now)).await {
            // stale timestamp only makes the next reconcile re-fetch sooner
            warn!("Stamping slot {} failed: {}", slot_id, e);
        }
        debug!("Slot {} refreshed", slot_id);
    }

    /// Load a slot's persisted state; `None` if it was never configured.
    pub async fn load_slot(&self, slot: SlotId) -> Result<Option<AutoUpdateSlot>> {
        let Some(auto_enabled) = self.get_field(slot, FIELD_IS_AUTO).await? else {
            return Ok(None);
        };

        let string_field = |v: Option<serde_json::Value>| {
            v.and_then(|v| v.as_str().map(String::from)).unwrap_or_default()
        };

        Ok(Some(AutoUpdateSlot {
            slot,
            auto_enabled: auto_enabled.as_bool().unwrap_or(false),
            api_url: string_field(self.get_field(slot, FIELD_API_URL).await?),
            match_pattern: string_field(self.get_field(slot, FIELD_MATCHER).await?),
            match_flags: string_field(self.get_field(slot, FIELD_FLAG).await?),
            placement_template: string_field(self.get_field(slot, FIELD_PLACER).await?),
            revalidation_interval_ms: self
                .get_field(slot, FIELD_INTERVAL)
                .await?
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            last_updated_at_ms: self
                .get_field(slot, FIELD_LAST_UPDATED)
                .await?
                .and_then(|v| v.as_i64()),
        }))
    }

    /// Every slot id with persisted configuration.
    async fn persisted_slots(&self) -> Result<Vec<SlotId>> {
        let keys = self.store.keys_with_prefix(&self.keys.namespace()).await?;
        let mut slots: Vec<SlotId> = keys
            .iter()
            .filter_map(|key| self.keys.slot_of_field(key, FIELD_IS_AUTO))
            .map(|(rule_id, header_index)| SlotId {
                rule_id,
                header_index,
            })
            .collect();
        slots.sort_by_key(|s| (s.rule_id, s.header_index));
        Ok(slots)
    }

    async fn get_field(&self, slot: SlotId, field: &str) -> Result<Option<serde_json::Value>> {
        self.store
            .get(&self.keys.slot_field(slot.rule_id, slot.header_index, field))
            .await
    }

    async fn set_field(&self, slot: SlotId, field: &str, value: serde_json::Value) -> Result<()> {
        self.store
            .set(
                &self.keys.slot_field(slot.rule_id, slot.header_index, field),
                value,
            )
            .await
    }
}
