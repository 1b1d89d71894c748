// SPDX-License-Identifier: MIT
//! Passive data describing automations: rules, conditions, actions.
//!
//! Condition and action types are enums, so an unknown type is rejected when
//! a rule is deserialized at save time — it can never reach evaluation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// AND/OR logic joining a rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Supported condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    DescriptionContains,
    DescriptionEquals,
    HasTag,
    ProjectIdEquals,
    ProjectNameContains,
    ClientIdEquals,
    ClientNameContains,
    IsBillable,
}

/// A single condition: a typed check against one time-entry field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    #[serde(default)]
    pub value: String,
}

impl Condition {
    pub fn new(condition_type: ConditionType, value: impl Into<String>) -> Self {
        Self {
            condition_type,
            value: value.into(),
        }
    }
}

/// Supported action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddTag,
    RemoveTag,
    SetDescription,
    AppendDescription,
    PrependDescription,
    SetBillable,
    SetProjectById,
    SetProjectByName,
    SetTaskById,
    SetTaskByName,
    OpenapiCall,
}

impl ActionType {
    /// Wire name, e.g. `add_tag`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AddTag => "add_tag",
            ActionType::RemoveTag => "remove_tag",
            ActionType::SetDescription => "set_description",
            ActionType::AppendDescription => "append_description",
            ActionType::PrependDescription => "prepend_description",
            ActionType::SetBillable => "set_billable",
            ActionType::SetProjectById => "set_project_by_id",
            ActionType::SetProjectByName => "set_project_by_name",
            ActionType::SetTaskById => "set_task_by_id",
            ActionType::SetTaskByName => "set_task_by_name",
            ActionType::OpenapiCall => "openapi_call",
        }
    }
}

/// An action executed when a rule matches.
///
/// Examples:
/// - `add_tag` with `{"tag": "urgent"}`
/// - `set_description` with `{"value": "Weekly sync — {{project.name}}"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// First non-empty of two argument keys (legacy payloads used both).
    pub fn arg_or(&self, primary: &str, fallback: &str) -> Option<&str> {
        self.arg(primary).or_else(|| self.arg(fallback))
    }
}

/// A stored automation: trigger event, conditions, actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique per workspace. Assigned on save when empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Event type this rule fires on. Empty/absent means the rule is a
    /// wildcard and applies to every event.
    #[serde(default)]
    pub trigger_event: Option<String>,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Assign a fresh id if none was provided.
    pub fn ensure_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    /// Whether this rule applies to the given inbound event type.
    pub fn applies_to(&self, event_type: &str) -> bool {
        match self.trigger_event.as_deref() {
            Some(trigger) if !trigger.trim().is_empty() => trigger == event_type,
            _ => true,
        }
    }
}
