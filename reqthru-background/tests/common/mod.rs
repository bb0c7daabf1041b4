//! Shared wiring for the integration suites: the background core built on
//! the in-memory host adapters, plus a canned fetcher.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use reqthru_background::{
    Background, BackgroundConfig, InMemoryRuleTable, MemoryStore, RecordingTabHost, ValueFetcher,
};
use reqthru_core::{HeaderInfo, HeaderOperation, Rule, RuleAction, RuleCondition, RuleId};

/// Fetcher returning one canned body (or `None`), recording requested URLs.
pub struct StaticFetcher {
    body: Option<String>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn with_body(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            body: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ValueFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Option<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.body.clone()
    }
}

/// The background core plus direct handles on its host adapters.
pub struct Harness {
    pub background: Background,
    pub store: MemoryStore,
    pub table: InMemoryRuleTable,
    pub tabs: RecordingTabHost,
}

pub fn harness(config: BackgroundConfig, fetcher: Arc<dyn ValueFetcher>) -> Harness {
    let store = MemoryStore::new();
    let table = InMemoryRuleTable::new(config.max_rules);
    let tabs = RecordingTabHost::new();
    let background = Background::new(
        Arc::new(store.clone()),
        Arc::new(table.clone()),
        Arc::new(tabs.clone()),
        fetcher,
        config,
    );
    Harness {
        background,
        store,
        table,
        tabs,
    }
}

pub fn default_harness() -> Harness {
    harness(
        BackgroundConfig::default(),
        Arc::new(StaticFetcher::failing()),
    )
}

pub fn header_rule(id: RuleId, domain: &str, header: &str, value: &str) -> Rule {
    Rule {
        id,
        condition: RuleCondition {
            initiator_domains: Some(vec![domain.to_string()]),
            ..Default::default()
        },
        action: RuleAction::ModifyHeaders {
            request_headers: vec![HeaderInfo {
                header: header.to_string(),
                operation: HeaderOperation::Set,
                value: value.to_string(),
            }],
        },
    }
}

/// Let spawned background tasks run until `done` holds (or give up).
pub async fn settle<F: Fn() -> bool>(done: F) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}
