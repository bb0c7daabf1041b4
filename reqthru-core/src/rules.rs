//! Declarative Traffic Rule Model
//!
//! Serde-compatible representation of the platform's dynamic rule table
//! entries: header-modification rules authored by the user and block rules
//! installed by the request-rate monitor. This crate never evaluates rules
//! against traffic itself; the host platform does the matching.

use serde::{Deserialize, Serialize};

/// Identifier of a rule within the dynamic rule table.
pub type RuleId = u32;

/// Identifier of a browser tab. Negative values are platform sentinels.
pub type TabId = i32;

/// Tab id reported for requests not associated with any tab.
pub const NO_TAB_ID: TabId = -1;

/// Offset at which the mirror twin of a rule is registered.
///
/// The platform distinguishes `initiatorDomains` from `requestDomains`
/// matching, so every user-authored rule scoped by initiator domains is
/// doubled at `id + MIRROR_ID_OFFSET` with the same domains registered as
/// request domains. Mirrors are hidden from the UI-facing read path.
pub const MIRROR_ID_OFFSET: RuleId = 100_000;

/// Prefix marking a header entry as logically disabled.
///
/// Disabled entries stay in the rule so the user's configuration survives,
/// but the header they would set is a no-op name the platform ignores.
pub const DISABLED_HEADER_MARKER: &str = "//";

/// One entry in the dynamic rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl Rule {
    /// Whether this rule is a synthesized mirror twin.
    pub fn is_mirror(&self) -> bool {
        self.condition.request_domains.is_some()
    }

    /// Synthesize the mirror twin of this rule, if it needs one.
    ///
    /// Returns `None` for rules without `initiator_domains` (block rules
    /// keyed by `url_filter` are never mirrored).
    pub fn mirror(&self) -> Option<Rule> {
        let domains = self.condition.initiator_domains.clone()?;
        let mut mirror = self.clone();
        mirror.id = self.id + MIRROR_ID_OFFSET;
        mirror.condition.initiator_domains = None;
        mirror.condition.request_domains = Some(domains);
        Some(mirror)
    }
}

/// Matching conditions for a rule.
///
/// Fields the core never interprets (`resource_types`,
/// `excluded_request_methods`) are carried opaquely so the UI's whole-rule
/// enable toggle survives a round trip through the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_request_methods: Option<Vec<String>>,
}

/// Action taken when a rule's condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    /// Rewrite request headers before the request leaves the browser.
    #[serde(rename_all = "camelCase")]
    ModifyHeaders { request_headers: Vec<HeaderInfo> },
    /// Cancel the request outright.
    Block,
}

impl RuleAction {
    /// Mutable access to the header list, if this is a modifyHeaders action.
    pub fn request_headers_mut(&mut self) -> Option<&mut Vec<HeaderInfo>> {
        match self {
            RuleAction::ModifyHeaders { request_headers } => Some(request_headers),
            RuleAction::Block => None,
        }
    }

    pub fn request_headers(&self) -> Option<&[HeaderInfo]> {
        match self {
            RuleAction::ModifyHeaders { request_headers } => Some(request_headers),
            RuleAction::Block => None,
        }
    }
}

/// A single header operation inside a modifyHeaders action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub header: String,
    pub operation: HeaderOperation,
    pub value: String,
}

impl HeaderInfo {
    /// Whether this entry carries the disable marker.
    pub fn is_disabled(&self) -> bool {
        self.header.starts_with(DISABLED_HEADER_MARKER)
    }

    /// Header name with the disable marker stripped.
    pub fn effective_name(&self) -> &str {
        self.header
            .strip_prefix(DISABLED_HEADER_MARKER)
            .unwrap_or(&self.header)
    }
}

/// Supported header operations. The platform offers append/remove as well;
/// this tool only ever sets values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderOperation {
    Set,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_rule(id: RuleId, domains: Option<Vec<&str>>) -> Rule {
        Rule {
            id,
            condition: RuleCondition {
                initiator_domains: domains
                    .map(|d| d.into_iter().map(String::from).collect()),
                ..Default::default()
            },
            action: RuleAction::ModifyHeaders {
                request_headers: vec![HeaderInfo {
                    header: "X-Test".to_string(),
                    operation: HeaderOperation::Set,
                    value: "v1".to_string(),
                }],
            },
        }
    }

    #[test]
    fn test_mirror_synthesis() {
        let rule = header_rule(5, Some(vec!["example.com"]));
        let mirror = rule.mirror().expect("rule with initiator domains mirrors");

        assert_eq!(mirror.id, 100_005);
        assert_eq!(mirror.condition.initiator_domains, None);
        assert_eq!(
            mirror.condition.request_domains,
            Some(vec!["example.com".to_string()])
        );
        assert_eq!(mirror.action, rule.action);
        assert!(mirror.is_mirror());
        assert!(!rule.is_mirror());
    }

    #[test]
    fn test_no_mirror_without_initiator_domains() {
        let rule = header_rule(7, None);
        assert!(rule.mirror().is_none());

        let block = Rule {
            id: 42,
            condition: RuleCondition {
                url_filter: Some("https://example.com/".to_string()),
                ..Default::default()
            },
            action: RuleAction::Block,
        };
        assert!(block.mirror().is_none());
    }

    #[test]
    fn test_disabled_header_marker() {
        let enabled = HeaderInfo {
            header: "Authorization".to_string(),
            operation: HeaderOperation::Set,
            value: "token".to_string(),
        };
        let disabled = HeaderInfo {
            header: "//Authorization".to_string(),
            operation: HeaderOperation::Set,
            value: "token".to_string(),
        };

        assert!(!enabled.is_disabled());
        assert!(disabled.is_disabled());
        assert_eq!(disabled.effective_name(), "Authorization");
    }

    #[test]
    fn test_platform_json_shape() {
        let rule = header_rule(5, Some(vec!["example.com"]));
        let json = serde_json::to_value(&rule).unwrap();

        assert_eq!(json["action"]["type"], "modifyHeaders");
        assert_eq!(json["action"]["requestHeaders"][0]["header"], "X-Test");
        assert_eq!(json["action"]["requestHeaders"][0]["operation"], "set");
        assert_eq!(json["condition"]["initiatorDomains"][0], "example.com");
        // absent optionals are omitted, matching the platform's shape
        assert!(json["condition"].get("requestDomains").is_none());

        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_block_action_has_no_body() {
        let block = Rule {
            id: 9,
            condition: RuleCondition::default(),
            action: RuleAction::Block,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["action"], serde_json::json!({ "type": "block" }));
    }
}
