//! Request-rate monitor integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{default_harness, harness, settle, Harness, StaticFetcher};
use reqthru_background::{BackgroundConfig, Dispatch, KeyValueStore, MonitorConfig};
use reqthru_core::{RuleAction, NO_TAB_ID};
use serde_json::json;

fn monitor_harness(threshold: u32, window: Duration) -> Harness {
    harness(
        BackgroundConfig {
            monitor: MonitorConfig { threshold, window },
            ..Default::default()
        },
        Arc::new(StaticFetcher::failing()),
    )
}

#[tokio::test]
async fn threshold_requests_do_not_block() {
    let h = monitor_harness(5, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..5 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }

    assert!(h.table.is_empty());
    assert!(!monitor.state().is_blocked(7));
}

#[tokio::test]
async fn exceeding_threshold_blocks_exactly_once() {
    let h = monitor_harness(5, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..6 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }

    // exactly one block rule, keyed by the tab id
    assert_eq!(h.table.len(), 1);
    let rule = h.table.rule(7).expect("block rule installed");
    assert_eq!(rule.action, RuleAction::Block);
    assert_eq!(
        rule.condition.url_filter.as_deref(),
        Some("https://spam.example.com")
    );

    assert!(monitor.state().is_blocked(7));
    // the counter restarts at zero once the tab is blocked
    assert_eq!(monitor.state().counter(7), 0);
    // the tab was reloaded bypassing cache to flush queued requests
    assert_eq!(h.tabs.reloaded(7), Some(true));

    // further traffic from the blocked tab never installs a second rule
    for _ in 0..10 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }
    assert_eq!(h.table.len(), 1);
}

#[tokio::test]
async fn tabs_are_blocked_independently() {
    let h = monitor_harness(3, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..4 {
        h.background.on_request(7, "https://a.example.com/x").await;
        h.background.on_request(8, "https://b.example.com/y").await;
    }

    assert!(monitor.state().is_blocked(7));
    assert!(monitor.state().is_blocked(8));
    assert!(h.table.rule(7).is_some());
    assert!(h.table.rule(8).is_some());
}

#[tokio::test]
async fn requests_without_a_tab_are_ignored() {
    let h = monitor_harness(1, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..10 {
        h.background
            .on_request(NO_TAB_ID, "https://spam.example.com/api")
            .await;
    }
    assert!(h.table.is_empty());
}

#[tokio::test]
async fn disabled_monitor_is_inert() {
    let h = monitor_harness(1, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(false).await;

    for _ in 0..10 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }
    assert!(h.table.is_empty());
    assert_eq!(monitor.state().counter(7), 0);
}

#[tokio::test]
async fn reset_tick_unblocks_and_zeroes_counters() {
    let h = monitor_harness(3, Duration::from_millis(100));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..5 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }
    assert!(monitor.state().is_blocked(7));
    assert!(h.table.rule(7).is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!monitor.state().is_blocked(7));
    assert!(h.table.rule(7).is_none());
    assert_eq!(monitor.state().counter(7), 0);
}

#[tokio::test]
async fn removing_the_block_rule_is_a_manual_unblock() {
    let h = monitor_harness(3, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..5 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }
    assert!(monitor.state().is_blocked(7));

    let dispatch = h
        .background
        .on_message(json!({
            "action": "updateRules",
            "payload": { "removeRuleIds": [7] }
        }))
        .await;
    assert!(matches!(dispatch, Dispatch::Reply(_)));

    assert!(!monitor.state().is_blocked(7));
    assert!(h.table.rule(7).is_none());
}

#[tokio::test]
async fn bootstrap_loads_persisted_flag_before_judging() {
    let h = monitor_harness(1, Duration::from_secs(60));
    // persisted off; the monitor has not loaded it yet
    h.store
        .set("reqThru_block", json!(false))
        .await
        .unwrap();

    // first events trigger the load and pass unjudged
    h.background.on_request(7, "https://spam.example.com/api").await;
    let monitor = h.background.monitor();
    settle(|| monitor.state().enabled().is_some()).await;

    for _ in 0..10 {
        h.background.on_request(7, "https://spam.example.com/api").await;
    }
    assert!(h.table.is_empty());
}

#[tokio::test]
async fn persisted_url_filters_apply_from_the_first_toggle() {
    let h = monitor_harness(2, Duration::from_secs(60));
    // the filter was saved in an earlier session
    h.store
        .set("reqThru_blockUrl", json!(["http://localhost/*"]))
        .await
        .unwrap();

    // the toggle arrives before any request is observed
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    for _ in 0..5 {
        h.background.on_request(7, "https://other.example.com/x").await;
    }
    // out-of-scope traffic is neither counted nor blocked
    assert!(h.table.rule(7).is_none());
    assert_eq!(monitor.state().counter(7), 0);
}

#[tokio::test]
async fn url_filters_scope_the_monitor() {
    let h = monitor_harness(2, Duration::from_secs(60));
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;
    monitor
        .set_block_url(vec!["http://localhost/*".to_string()])
        .await
        .unwrap();

    // out-of-filter traffic is never counted
    for _ in 0..10 {
        h.background.on_request(7, "https://other.example.com/x").await;
    }
    assert!(h.table.is_empty());

    // in-filter traffic is
    for _ in 0..3 {
        h.background.on_request(7, "http://localhost/loop").await;
    }
    assert!(h.table.rule(7).is_some());
}

#[tokio::test]
async fn invalid_block_url_batch_changes_nothing() {
    let h = default_harness();
    let monitor = h.background.monitor();
    monitor.set_enabled(true).await;

    let dispatch = h
        .background
        .on_message(json!({
            "action": "setBlockUrl",
            "payload": ["https://*/*", "not-a-pattern"]
        }))
        .await;

    match dispatch {
        Dispatch::Reply(value) => {
            let message = value.as_str().unwrap();
            assert!(message.contains("not-a-pattern"));
        }
        Dispatch::NoReply => panic!("validation failure must reply with the error"),
    }
    // nothing was persisted
    assert_eq!(h.store.get("reqThru_blockUrl").await.unwrap(), None);

    // a valid batch is fire-and-forget
    let dispatch = h
        .background
        .on_message(json!({ "action": "setBlockUrl", "payload": ["https://*/*"] }))
        .await;
    assert_eq!(dispatch, Dispatch::NoReply);
    assert_eq!(
        h.store.get("reqThru_blockUrl").await.unwrap(),
        Some(json!(["https://*/*"]))
    );
}
