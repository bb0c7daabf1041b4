//! Message Router
//!
//! Sole entry point for the UI collaborator. Commands arrive as tagged
//! JSON (`action` + `payload`), are dispatched to exactly one component
//! operation, and answer with an explicit [`Dispatch`]: `Reply` carries a
//! value back over the channel, `NoReply` tells the transport to close it
//! instead of waiting. Fire-and-forget actions and unrecognized messages
//! both land on `NoReply` so the transport never times out guessing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::alias::AliasStore;
use crate::autoupdate::{AutoUpdateConfig, AutoUpdateScheduler, SlotId};
use crate::monitor::RequestMonitor;
use crate::repository::{RuleRepository, RuleUpdate};
use reqthru_core::RuleId;

/// The closed set of commands the UI can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Command {
    GetRules,
    UpdateRules(RuleUpdate),
    SetBlock(bool),
    SetBlockUrl(Vec<String>),
    GetRuleAliases,
    UpdateRuleAlias { id: RuleId, alias: String },
    DeleteRuleAlias { id: RuleId },
    SetAutoUpdate(AutoUpdateConfig),
    ClearAutoUpdate(String),
    ClearAllAutoUpdate,
}

/// What the transport should do once a command has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this value back over the still-open channel.
    Reply(Value),
    /// Close the channel; the caller did not ask for a reply.
    NoReply,
}

/// Dispatches commands to the owning components.
pub struct MessageRouter {
    repository: Arc<RuleRepository>,
    scheduler: AutoUpdateScheduler,
    monitor: Arc<RequestMonitor>,
    aliases: Arc<AliasStore>,
}

impl MessageRouter {
    pub fn new(
        repository: Arc<RuleRepository>,
        scheduler: AutoUpdateScheduler,
        monitor: Arc<RequestMonitor>,
        aliases: Arc<AliasStore>,
    ) -> Self {
        Self {
            repository,
            scheduler,
            monitor,
            aliases,
        }
    }

    /// Transport entry point. Malformed or unrecognized messages are
    /// logged and produce `NoReply`.
    pub async fn handle_value(&self, message: Value) -> Dispatch {
        match serde_json::from_value::<Command>(message) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                warn!("Unrecognized message: {}", e);
                Dispatch::NoReply
            }
        }
    }

    pub async fn handle(&self, command: Command) -> Dispatch {
        match command {
            Command::GetRules => match self.repository.list().await {
                Ok(rules) => Dispatch::Reply(json!(rules)),
                Err(e) => {
                    warn!("Listing rules failed: {}", e);
                    Dispatch::NoReply
                }
            },

            Command::UpdateRules(update) => {
                let removed = update.remove_rule_ids.clone();
                let outcome = self.repository.apply(update).await;
                if outcome.success {
                    self.cleanup_removed(&removed).await;
                }
                Dispatch::Reply(json!(outcome))
            }

            Command::SetBlock(enabled) => {
                self.monitor.set_enabled(enabled).await;
                Dispatch::NoReply
            }

            Command::SetBlockUrl(patterns) => match self.monitor.set_block_url(patterns).await {
                Ok(()) => Dispatch::NoReply,
                Err(message) => Dispatch::Reply(json!(message)),
            },

            Command::GetRuleAliases => match self.aliases.list().await {
                Ok(aliases) => Dispatch::Reply(json!(aliases)),
                Err(e) => {
                    warn!("Listing aliases failed: {}", e);
                    Dispatch::NoReply
                }
            },

            Command::UpdateRuleAlias { id, alias } => {
                let success = match self.aliases.update(id, &alias).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Updating alias for rule {} failed: {}", id, e);
                        false
                    }
                };
                Dispatch::Reply(json!({ "success": success }))
            }

            Command::DeleteRuleAlias { id } => {
                let success = match self.aliases.delete(id).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Deleting alias for rule {} failed: {}", id, e);
                        false
                    }
                };
                Dispatch::Reply(json!({ "success": success }))
            }

            Command::SetAutoUpdate(config) => {
                if let Err(e) = self.scheduler.set_auto_update(config).await {
                    warn!("Enabling auto-update failed: {}", e);
                }
                Dispatch::NoReply
            }

            Command::ClearAutoUpdate(rule_item_id) => {
                match SlotId::parse(&rule_item_id) {
                    Ok(slot) => {
                        if let Err(e) = self.scheduler.clear_auto_update(slot).await {
                            warn!("Clearing auto-update slot {} failed: {}", slot, e);
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
                Dispatch::NoReply
            }

            Command::ClearAllAutoUpdate => {
                if let Err(e) = self.scheduler.clear_all_auto_update().await {
                    warn!("Clearing auto-update slots failed: {}", e);
                }
                Dispatch::NoReply
            }
        }
    }

    /// Rule deletion drags its alias and auto-update slots along. Failures
    /// leave dangling entries, which are tolerated and simply unused.
    async fn cleanup_removed(&self, removed: &[RuleId]) {
        for id in removed {
            if let Err(e) = self.aliases.delete(*id).await {
                warn!("Deleting alias for removed rule {} failed: {}", id, e);
            }
            if let Err(e) = self.scheduler.clear_for_rule(*id).await {
                warn!("Clearing slots for removed rule {} failed: {}", id, e);
            }
        }
    }
}
