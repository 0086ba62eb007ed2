//! Classification rules and the mailbox catalog they resolve into

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::MailboxConfig;

/// Action prefix that names a destination mailbox
pub const MOVE_ACTION_PREFIX: &str = "move:";

/// One classification rule as configured under `[[rules]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub classification: String,
    pub actions: Vec<String>,
}

impl Rule {
    /// Mailbox named by the first `move:` action, if any
    pub fn target_mailbox(&self) -> Option<&str> {
        self.actions
            .iter()
            .find_map(|action| action.strip_prefix(MOVE_ACTION_PREFIX))
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Immutable rule catalog shared by prompt rendering and the dispatcher
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Render the catalog as the rule listing embedded in triage prompts
    pub fn render(&self) -> String {
        self.rules
            .iter()
            .map(|rule| {
                format!(
                    "{}: Action to take {}. Classification: {}",
                    rule.name,
                    rule.actions.join(", "),
                    rule.classification
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve a classification label into the mailbox its rule moves mail to
    pub fn mailbox_for(&self, classification: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.classification == classification)
            .and_then(Rule::target_mailbox)
    }
}

/// Mailboxes the tools may move mail into, keyed by display name
#[derive(Debug, Clone)]
pub struct MailboxCatalog {
    managed_prefix: String,
    ids: BTreeMap<String, String>,
}

impl MailboxCatalog {
    pub fn new(managed_prefix: impl Into<String>, ids: BTreeMap<String, String>) -> Self {
        Self {
            managed_prefix: managed_prefix.into(),
            ids,
        }
    }

    pub fn from_config(config: &MailboxConfig) -> Self {
        Self::new(config.managed_prefix.clone(), config.ids.clone())
    }

    /// Provider id of any known mailbox, managed or not
    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    /// Provider id of a valid move target
    ///
    /// A target must sit under the managed prefix and be present in the
    /// catalog; anything else resolves to `None`.
    pub fn resolve_target(&self, name: &str) -> Option<&str> {
        if !name.starts_with(&self.managed_prefix) {
            tracing::warn!(
                "Mailbox '{}' is outside the managed prefix '{}'",
                name,
                self.managed_prefix
            );
            return None;
        }
        let id = self.id_of(name);
        if id.is_none() {
            tracing::warn!("Mailbox '{}' is not in the mailbox catalog", name);
        }
        id
    }

    /// Names of every managed mailbox in the catalog
    pub fn managed_names(&self) -> Vec<&str> {
        self.ids
            .keys()
            .filter(|name| name.starts_with(&self.managed_prefix))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, classification: &str, actions: &[&str]) -> Rule {
        Rule {
            name: name.to_string(),
            classification: classification.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn catalog() -> RuleCatalog {
        RuleCatalog::new(vec![
            rule("Invoices", "Finance", &["move:AI/Finance"]),
            rule("Alerts", "Alert", &["flag", "move:AI/Alerts"]),
            rule("Keep", "Keep", &["flag"]),
        ])
    }

    #[test]
    fn test_render_lists_every_rule() {
        let rendered = catalog().render();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Invoices: Action to take move:AI/Finance. Classification: Finance"
        );
        assert_eq!(
            lines[1],
            "Alerts: Action to take flag, move:AI/Alerts. Classification: Alert"
        );
    }

    #[test]
    fn test_render_empty_catalog() {
        assert_eq!(RuleCatalog::default().render(), "");
    }

    #[test]
    fn test_mailbox_for_classification() {
        let rules = catalog();
        assert_eq!(rules.mailbox_for("Finance"), Some("AI/Finance"));
        assert_eq!(rules.mailbox_for("Alert"), Some("AI/Alerts"));
        assert_eq!(rules.mailbox_for("Keep"), None);
        assert_eq!(rules.mailbox_for("finance"), None);
        assert_eq!(rules.mailbox_for("Unknown"), None);
    }

    #[test]
    fn test_target_mailbox_ignores_blank_move() {
        assert_eq!(rule("Blank", "Blank", &["move:  "]).target_mailbox(), None);
    }

    #[test]
    fn test_resolve_target_requires_prefix_and_membership() {
        let mut ids = BTreeMap::new();
        ids.insert("AI/Finance".to_string(), "Label_1".to_string());
        ids.insert("Screener".to_string(), "Label_2".to_string());
        let mailboxes = MailboxCatalog::new("AI/", ids);

        assert_eq!(mailboxes.resolve_target("AI/Finance"), Some("Label_1"));
        assert_eq!(mailboxes.resolve_target("AI/Missing"), None);
        assert_eq!(mailboxes.resolve_target("Screener"), None);
        assert_eq!(mailboxes.id_of("Screener"), Some("Label_2"));
        assert_eq!(mailboxes.managed_names(), vec!["AI/Finance"]);
    }
}
