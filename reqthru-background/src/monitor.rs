//! Request-Rate Monitor
//!
//! Watches every outgoing request the platform reports, counts per-tab
//! volume in a rolling window, and installs a temporary block rule for any
//! tab that goes runaway (infinite-loop protection). Blocking is per-tab
//! and self-healing: a repeating reset tick clears all counters and lifts
//! every block once per window.
//!
//! The observation hook never delays the request it observes; the only
//! means of stopping traffic is the declarative rule the platform itself
//! enforces, plus a cache-bypassing reload to flush requests already
//! queued. Counters are best-effort approximate under bursty concurrent
//! arrivals, which is all coarse rate detection needs.

use dashmap::{DashMap, DashSet};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::MonitorConfig;
use crate::platform::TabHost;
use crate::repository::{RuleRepository, RuleUpdate};
use crate::store::{KeyValueStore, StoreKeys};
use reqthru_core::{
    match_pattern, MatchPattern, Rule, RuleAction, RuleCondition, RuleId, TabId, NO_TAB_ID,
};

/// The single owned monitor state object: enabled flag, per-tab request
/// counters, and the set of currently blocked tabs. All mutation funnels
/// through these methods so the state stays testable in isolation.
#[derive(Debug, Default)]
pub struct BlockState {
    /// `None` until the persisted flag has been loaded.
    enabled: RwLock<Option<bool>>,
    counters: DashMap<TabId, u32>,
    blocked: DashSet<TabId>,
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the persisted flag has not been loaded yet.
    pub fn enabled(&self) -> Option<bool> {
        *self.enabled.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write().unwrap_or_else(|e| e.into_inner()) = Some(enabled);
    }

    /// Increment a tab's counter and return the new count.
    pub fn bump(&self, tab_id: TabId) -> u32 {
        let mut entry = self.counters.entry(tab_id).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn reset_counter(&self, tab_id: TabId) {
        self.counters.insert(tab_id, 0);
    }

    pub fn reset_all_counters(&self) {
        self.counters.clear();
    }

    pub fn counter(&self, tab_id: TabId) -> u32 {
        self.counters.get(&tab_id).map(|c| *c).unwrap_or(0)
    }

    pub fn is_blocked(&self, tab_id: TabId) -> bool {
        self.blocked.contains(&tab_id)
    }

    pub fn mark_blocked(&self, tab_id: TabId) {
        self.blocked.insert(tab_id);
    }

    /// Returns whether the tab was actually blocked.
    pub fn clear_blocked(&self, tab_id: TabId) -> bool {
        self.blocked.remove(&tab_id).is_some()
    }

    /// Drain the blocked set, returning the tabs that were blocked.
    pub fn take_blocked(&self) -> Vec<TabId> {
        let tabs: Vec<TabId> = self.blocked.iter().map(|t| *t).collect();
        for tab in &tabs {
            self.blocked.remove(tab);
        }
        tabs
    }
}

/// Per-request monitor with per-tab blocking and auto-recovery.
pub struct RequestMonitor {
    state: Arc<BlockState>,
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    repository: Arc<RuleRepository>,
    tabs: Arc<dyn TabHost>,
    config: MonitorConfig,
    filters: Arc<RwLock<Vec<MatchPattern>>>,
    bootstrap_started: AtomicBool,
    tick_started: AtomicBool,
}

impl RequestMonitor {
    pub fn new(
        state: Arc<BlockState>,
        store: Arc<dyn KeyValueStore>,
        keys: StoreKeys,
        repository: Arc<RuleRepository>,
        tabs: Arc<dyn TabHost>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            state,
            store,
            keys,
            repository,
            tabs,
            config,
            filters: Arc::new(RwLock::new(Vec::new())),
            bootstrap_started: AtomicBool::new(false),
            tick_started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Arc<BlockState> {
        self.state.clone()
    }

    /// Observation hook, called for every outgoing request the platform
    /// reports. Never blocks or delays the request itself.
    pub async fn on_request(&self, tab_id: TabId, url: &str) {
        if tab_id == NO_TAB_ID {
            return;
        }

        let enabled = match self.state.enabled() {
            Some(enabled) => enabled,
            None => {
                // Bounded-latency bootstrap: the first observed requests
                // trigger the async flag load and pass unjudged.
                self.start_bootstrap();
                return;
            }
        };
        if !enabled {
            return;
        }

        let Ok(parsed) = Url::parse(url) else {
            return;
        };
        if !self.watches(&parsed) {
            return;
        }

        self.ensure_reset_tick();

        let count = self.state.bump(tab_id);
        if count > self.config.threshold && !self.state.is_blocked(tab_id) {
            self.block_tab(tab_id, &parsed).await;
        }
    }

    /// Toggle the monitor and persist the flag. A toggle can arrive before
    /// any request is observed, so it also forces the persisted filter
    /// load; otherwise the saved URL scope would stay ignored for the
    /// whole session.
    pub async fn set_enabled(&self, enabled: bool) {
        self.state.set_enabled(enabled);
        if !self.bootstrap_started.swap(true, Ordering::SeqCst) {
            load_persisted(
                self.state.clone(),
                self.store.clone(),
                self.filters.clone(),
                self.keys.clone(),
            )
            .await;
        }
        if let Err(e) = self.store.set(&self.keys.block(), json!(enabled)).await {
            warn!("Persisting monitor flag failed: {}", e);
        }
    }

    /// Replace the watched-URL filter, all-or-nothing. The error string
    /// names every offending pattern; on failure the active filter and the
    /// persisted value are untouched.
    pub async fn set_block_url(&self, patterns: Vec<String>) -> std::result::Result<(), String> {
        let parsed = match_pattern::validate_all(&patterns)?;
        self.store
            .set(&self.keys.block_url(), json!(patterns))
            .await
            .map_err(|e| e.to_string())?;
        *self.filters.write().unwrap_or_else(|e| e.into_inner()) = parsed;
        Ok(())
    }

    /// Whether the monitor cares about this URL. An empty filter list
    /// means everything is watched.
    fn watches(&self, url: &Url) -> bool {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        filters.is_empty() || filters.iter().any(|p| p.matches(url))
    }

    /// Load the persisted enabled flag and URL filters, once, off the
    /// request path.
    fn start_bootstrap(&self) {
        if self.bootstrap_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(load_persisted(
            self.state.clone(),
            self.store.clone(),
            self.filters.clone(),
            self.keys.clone(),
        ));
    }

    /// Install the block rule for a runaway tab and flush its queue.
    async fn block_tab(&self, tab_id: TabId, url: &Url) {
        let Ok(rule_id) = RuleId::try_from(tab_id) else {
            return;
        };

        // Block rules reuse the tab id as rule id, so at most one per tab,
        // and carry the offending origin as their urlFilter. They are
        // never mirrored.
        let rule = Rule {
            id: rule_id,
            condition: RuleCondition {
                url_filter: Some(url.origin().ascii_serialization()),
                ..Default::default()
            },
            action: RuleAction::Block,
        };

        let outcome = self
            .repository
            .apply(RuleUpdate {
                remove_rule_ids: vec![],
                add_rules: vec![rule],
            })
            .await;
        if !outcome.success {
            warn!(
                "Installing block rule for tab {} failed: {}",
                tab_id,
                outcome.error.unwrap_or_default()
            );
            return;
        }

        info!(
            "Tab {} exceeded {} requests, blocking {}",
            tab_id,
            self.config.threshold,
            url.origin().ascii_serialization()
        );
        self.state.mark_blocked(tab_id);
        self.state.reset_counter(tab_id);

        // Cancel whatever is already queued; a failed reload is logged and
        // the block rule stays in effect regardless.
        if let Err(e) = self.tabs.reload_tab(tab_id, true).await {
            warn!("Reloading blocked tab {} failed: {}", tab_id, e);
        }
    }

    /// Start the repeating reset tick, exactly once. The tick has no
    /// cancellation path: it lives for the rest of the process, which the
    /// host may tear down at any time.
    fn ensure_reset_tick(&self) {
        if self.tick_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.clone();
        let repository = self.repository.clone();
        let window = self.config.window;
        tokio::spawn(async move {
            let mut tick = interval(window);
            tick.tick().await; // the first tick fires immediately
            loop {
                tick.tick().await;
                reset_window(&state, &repository).await;
            }
        });
    }
}

/// One-shot load of the persisted monitor state. The enabled flag only
/// applies while still unloaded, so a `setBlock` that raced ahead of the
/// load wins; the URL filters always apply.
async fn load_persisted(
    state: Arc<BlockState>,
    store: Arc<dyn KeyValueStore>,
    filters: Arc<RwLock<Vec<MatchPattern>>>,
    keys: StoreKeys,
) {
    // missing flag = enabled, matching a fresh install
    let enabled = match store.get(&keys.block()).await {
        Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(true),
        Err(e) => {
            warn!("Loading monitor flag failed: {}", e);
            true
        }
    };
    if state.enabled().is_none() {
        state.set_enabled(enabled);
    }

    let patterns: Vec<String> = match store.get(&keys.block_url()).await {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
        _ => Vec::new(),
    };
    if let Ok(parsed) = match_pattern::validate_all(&patterns) {
        *filters.write().unwrap_or_else(|e| e.into_inner()) = parsed;
    }
    debug!("Monitor state loaded, enabled={}", enabled);
}

/// One reset tick: clear all counters and lift every block.
pub(crate) async fn reset_window(state: &BlockState, repository: &RuleRepository) {
    state.reset_all_counters();

    let blocked = state.take_blocked();
    if blocked.is_empty() {
        return;
    }

    let remove_rule_ids: Vec<RuleId> = blocked
        .iter()
        .filter_map(|tab| RuleId::try_from(*tab).ok())
        .collect();
    info!("Reset tick: unblocking tabs {:?}", blocked);

    let outcome = repository
        .apply(RuleUpdate {
            remove_rule_ids,
            add_rules: vec![],
        })
        .await;
    if !outcome.success {
        // keep the tabs marked so the next tick retries the removal
        for tab in &blocked {
            state.mark_blocked(*tab);
        }
        warn!(
            "Removing block rules failed, retrying next tick: {}",
            outcome.error.unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_state_counting() {
        let state = BlockState::new();
        assert_eq!(state.bump(7), 1);
        assert_eq!(state.bump(7), 2);
        assert_eq!(state.bump(8), 1);

        state.reset_counter(7);
        assert_eq!(state.counter(7), 0);
        assert_eq!(state.counter(8), 1);

        state.reset_all_counters();
        assert_eq!(state.counter(8), 0);
    }

    #[test]
    fn test_block_state_blocking() {
        let state = BlockState::new();
        assert!(!state.is_blocked(7));

        state.mark_blocked(7);
        state.mark_blocked(9);
        assert!(state.is_blocked(7));
        assert!(state.clear_blocked(7));
        assert!(!state.clear_blocked(7));

        let mut drained = state.take_blocked();
        drained.sort();
        assert_eq!(drained, vec![9]);
        assert!(state.take_blocked().is_empty());
    }

    #[test]
    fn test_enabled_starts_unloaded() {
        let state = BlockState::new();
        assert_eq!(state.enabled(), None);
        state.set_enabled(false);
        assert_eq!(state.enabled(), Some(false));
    }

    struct OfflineTable;

    #[async_trait::async_trait]
    impl crate::platform::RuleTable for OfflineTable {
        async fn all_rules(&self) -> crate::error::Result<Vec<Rule>> {
            Ok(vec![])
        }

        async fn update(
            &self,
            _remove_ids: Vec<RuleId>,
            _add: Vec<Rule>,
        ) -> crate::error::Result<()> {
            Err(crate::error::BackgroundError::RuleTable(
                "table offline".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_blocked_tabs_for_retry() {
        let state = Arc::new(BlockState::new());
        state.mark_blocked(7);
        state.bump(7);
        let repository = RuleRepository::new(Arc::new(OfflineTable), state.clone());

        reset_window(&state, &repository).await;

        // counters are gone, but the blocked set survives the failed batch
        assert_eq!(state.counter(7), 0);
        assert!(state.is_blocked(7));
    }
}
