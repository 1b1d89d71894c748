// SPDX-License-Identifier: MIT
//! Rule store seam.
//!
//! The engine only reads `get_enabled` on the webhook path; the CRUD surface
//! writes through `save`/`delete`. The SQL-backed implementation lives
//! outside this crate — [`InMemoryRuleStore`] covers single-process
//! deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::rules::model::Rule;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence behind the rule CRUD surface.
///
/// `get_all`/`get_enabled` return rules in a stable store order; matching
/// rules execute in exactly that order (there is no priority field).
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert or replace (by id) a rule in a workspace. Returns the stored
    /// rule, with an id assigned if the caller left it empty.
    async fn save(&self, workspace_id: &str, rule: Rule) -> Result<Rule, StoreError>;

    async fn get_all(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Enabled rules only, in store order.
    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Returns true when a rule was removed.
    async fn delete(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError>;

    /// Workspaces that have at least one rule (diagnostics).
    async fn list_workspaces(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store preserving insertion order per workspace.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<String, Vec<Rule>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn save(&self, workspace_id: &str, mut rule: Rule) -> Result<Rule, StoreError> {
        rule.ensure_id();
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let workspace = rules.entry(workspace_id.to_string()).or_default();
        match workspace.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => workspace.push(rule.clone()),
        }
        Ok(rule)
    }

    async fn get_all(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Ok(rules.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Ok(rules
            .get(workspace_id)
            .map(|list| list.iter().filter(|r| r.enabled).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let Some(workspace) = rules.get_mut(workspace_id) else {
            return Ok(false);
        };
        let before = workspace.len();
        workspace.retain(|r| r.id != rule_id);
        Ok(workspace.len() < before)
    }

    async fn list_workspaces(&self) -> Result<Vec<String>, StoreError> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Ok(rules.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, enabled: bool) -> Rule {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "enabled": enabled,
            "conditions": [{"type": "isBillable", "value": "true"}],
            "actions": [{"type": "add_tag", "args": {"tag": name}}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_assigns_an_id() {
        let store = InMemoryRuleStore::new();
        let saved = store.save("ws1", rule("a", true)).await.unwrap();
        assert!(!saved.id.is_empty());
    }

    #[tokio::test]
    async fn save_replaces_by_id() {
        let store = InMemoryRuleStore::new();
        let saved = store.save("ws1", rule("a", true)).await.unwrap();
        let mut updated = saved.clone();
        updated.name = "a-renamed".into();
        store.save("ws1", updated).await.unwrap();

        let all = store.get_all("ws1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "a-renamed");
    }

    #[tokio::test]
    async fn get_enabled_filters_and_preserves_order() {
        let store = InMemoryRuleStore::new();
        store.save("ws1", rule("first", true)).await.unwrap();
        store.save("ws1", rule("disabled", false)).await.unwrap();
        store.save("ws1", rule("second", true)).await.unwrap();

        let enabled = store.get_enabled("ws1").await.unwrap();
        let names: Vec<&str> = enabled.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn workspaces_are_isolated() {
        let store = InMemoryRuleStore::new();
        store.save("ws1", rule("a", true)).await.unwrap();
        assert!(store.get_all("ws2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_rule_was_removed() {
        let store = InMemoryRuleStore::new();
        let saved = store.save("ws1", rule("a", true)).await.unwrap();
        assert!(store.delete("ws1", &saved.id).await.unwrap());
        assert!(!store.delete("ws1", &saved.id).await.unwrap());
    }
}
