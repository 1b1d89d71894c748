// SPDX-License-Identifier: MIT
//! Typed view over one webhook payload.

use serde_json::Value;

/// Immutable wrapper around a webhook payload for rule evaluation and
/// templating. The time entry is the `timeEntry` object when the payload
/// nests one, otherwise the payload itself.
#[derive(Debug, Clone)]
pub struct TimeEntryContext {
    payload: Value,
}

impl TimeEntryContext {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The full webhook payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The time-entry object within the payload.
    pub fn entry(&self) -> &Value {
        self.payload.get("timeEntry").unwrap_or(&self.payload)
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.entry().get("id").and_then(Value::as_str)
    }

    pub fn description(&self) -> &str {
        self.entry()
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn project_id(&self) -> Option<&str> {
        self.entry().get("projectId").and_then(Value::as_str)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.entry()
            .get("clientId")
            .and_then(Value::as_str)
            .or_else(|| {
                self.entry()
                    .pointer("/project/clientId")
                    .and_then(Value::as_str)
            })
    }

    pub fn task_id(&self) -> Option<&str> {
        self.entry().get("taskId").and_then(Value::as_str)
    }

    pub fn tag_ids(&self) -> Vec<String> {
        match self.entry().get("tagIds") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Missing or non-boolean `billable` reads as false.
    pub fn billable(&self) -> bool {
        self.entry()
            .get("billable")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// ISO-8601 duration from the time interval, when present.
    pub fn duration(&self) -> Option<&str> {
        self.entry()
            .pointer("/timeInterval/duration")
            .or_else(|| self.entry().get("duration"))
            .and_then(Value::as_str)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.payload.get("workspaceId").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.payload
            .get("userId")
            .and_then(Value::as_str)
            .or_else(|| self.entry().get("userId").and_then(Value::as_str))
    }

    /// Project name embedded in the payload, if the event carries one.
    pub fn embedded_project_name(&self) -> Option<&str> {
        self.entry()
            .pointer("/project/name")
            .and_then(Value::as_str)
    }

    /// Client name embedded in the payload, if the event carries one.
    pub fn embedded_client_name(&self) -> Option<&str> {
        self.entry()
            .pointer("/project/clientName")
            .and_then(Value::as_str)
            .or_else(|| self.entry().pointer("/client/name").and_then(Value::as_str))
    }
}
