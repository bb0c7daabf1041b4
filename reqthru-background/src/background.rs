//! Background Wiring
//!
//! Assembles the components into one object exposing the four hooks the
//! host platform drives: install, message, request observation, and tab
//! activation. The host supplies its own adapters for storage, the rule
//! table, tab control and fetching; tests wire in the in-memory ones.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alias::AliasStore;
use crate::autoupdate::AutoUpdateScheduler;
use crate::config::BackgroundConfig;
use crate::error::Result;
use crate::fetcher::ValueFetcher;
use crate::monitor::{BlockState, RequestMonitor};
use crate::platform::{RuleTable, TabHost};
use crate::repository::RuleRepository;
use crate::router::{Dispatch, MessageRouter};
use crate::store::{KeyValueStore, StoreKeys};
use reqthru_core::TabId;

/// The background coordination core.
pub struct Background {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    repository: Arc<RuleRepository>,
    scheduler: AutoUpdateScheduler,
    monitor: Arc<RequestMonitor>,
    router: MessageRouter,
}

impl Background {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table: Arc<dyn RuleTable>,
        tabs: Arc<dyn TabHost>,
        fetcher: Arc<dyn ValueFetcher>,
        config: BackgroundConfig,
    ) -> Self {
        let keys = StoreKeys::new(config.store_prefix.clone());
        let block_state = Arc::new(BlockState::new());

        let repository = Arc::new(RuleRepository::new(table, block_state.clone()));
        let scheduler = AutoUpdateScheduler::new(
            store.clone(),
            keys.clone(),
            repository.clone(),
            fetcher,
        );
        let monitor = Arc::new(RequestMonitor::new(
            block_state,
            store.clone(),
            keys.clone(),
            repository.clone(),
            tabs,
            config.monitor,
        ));
        let aliases = Arc::new(AliasStore::new(store.clone(), keys.clone()));
        let router = MessageRouter::new(
            repository.clone(),
            scheduler.clone(),
            monitor.clone(),
            aliases,
        );

        Self {
            store,
            keys,
            repository,
            scheduler,
            monitor,
            router,
        }
    }

    /// Fresh-install hook: the entire namespaced store is cleared, no
    /// migration across installs.
    pub async fn on_installed(&self) -> Result<()> {
        info!("Fresh install, clearing namespace {}", self.keys.namespace());
        self.store.clear_prefix(&self.keys.namespace()).await
    }

    /// Message hook: one UI command in, one dispatch decision out.
    pub async fn on_message(&self, message: Value) -> Dispatch {
        self.router.handle_value(message).await
    }

    /// Per-request observation hook.
    pub async fn on_request(&self, tab_id: TabId, url: &str) {
        self.monitor.on_request(tab_id, url).await;
    }

    /// Tab-activation hook: the scheduling tick for background
    /// revalidation.
    pub async fn on_tab_activated(&self) {
        if let Err(e) = self.scheduler.reconcile_on_tab_activate().await {
            warn!("Reconcile on tab activation failed: {}", e);
        }
    }

    pub fn repository(&self) -> Arc<RuleRepository> {
        self.repository.clone()
    }

    pub fn scheduler(&self) -> &AutoUpdateScheduler {
        &self.scheduler
    }

    pub fn monitor(&self) -> Arc<RequestMonitor> {
        self.monitor.clone()
    }
}
