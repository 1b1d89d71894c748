// SPDX-License-Identifier: MIT
//! Action execution — performs (or simulates) side effects via the external
//! API.
//!
//! Actions run independently: one failed action is recorded and the rest
//! still run. In dry-run mode every action is logged as would-apply and no
//! network call is made. Mutating calls retry only on 429 (bounded, with
//! `Retry-After` honored); replaying a mutation that may have landed risks
//! duplicate side effects.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::workspace::WorkspaceSnapshot;
use crate::cache::WorkspaceCache;
use crate::client::{ApiError, CallMethod, TrackerApi};
use crate::engine::context::TimeEntryContext;
use crate::engine::placeholder;
use crate::metrics::SharedMetrics;
use crate::retry::{retry_with_backoff, BackoffConfig};
use crate::rules::model::{Action, ActionType};

/// Result of one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub success: bool,
    /// True when the action was only logged (dry-run), not performed.
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    fn applied(action_type: ActionType) -> Self {
        Self {
            action_type,
            success: true,
            dry_run: false,
            error: None,
        }
    }

    fn would_apply(action_type: ActionType) -> Self {
        Self {
            action_type,
            success: true,
            dry_run: true,
            error: None,
        }
    }

    fn failed(action_type: ActionType, error: impl std::fmt::Display) -> Self {
        Self {
            action_type,
            success: false,
            dry_run: false,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate counts over a batch of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ExecutionSummary {
    pub fn of(outcomes: &[ActionOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        Self {
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

#[derive(Debug, Error)]
enum ActionError {
    #[error("missing required argument '{0}'")]
    MissingArg(&'static str),
    #[error("time entry id missing from payload")]
    MissingEntryId,
    #[error("unknown project name '{0}'")]
    UnknownProject(String),
    #[error("unknown task name '{0}'")]
    UnknownTask(String),
    #[error("could not create tag '{0}'")]
    TagCreateFailed(String),
    #[error("openapi_call method must be GET or POST, got '{0}'")]
    MethodNotAllowed(String),
    #[error("openapi_call path must stay inside the calling workspace")]
    PathOutsideWorkspace,
    #[error("openapi_call body is not valid JSON: {0}")]
    InvalidBody(serde_json::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Executes rule actions against the external API.
pub struct ActionExecutor {
    api: Arc<dyn TrackerApi>,
    cache: Arc<WorkspaceCache>,
    metrics: SharedMetrics,
    backoff: BackoffConfig,
    apply_changes: bool,
}

impl ActionExecutor {
    pub fn new(
        api: Arc<dyn TrackerApi>,
        cache: Arc<WorkspaceCache>,
        metrics: SharedMetrics,
        backoff: BackoffConfig,
        apply_changes: bool,
    ) -> Self {
        Self {
            api,
            cache,
            metrics,
            backoff,
            apply_changes,
        }
    }

    pub fn apply_changes(&self) -> bool {
        self.apply_changes
    }

    /// Execute a batch of actions for one time entry.
    ///
    /// Outcomes are returned in action order; a failure never stops the
    /// remaining actions.
    pub async fn execute(
        &self,
        actions: &[Action],
        ctx: &TimeEntryContext,
        snapshot: &WorkspaceSnapshot,
        workspace_id: &str,
        token: &str,
    ) -> Vec<ActionOutcome> {
        if !self.apply_changes {
            return self.dry_run(actions);
        }

        let mut state = BatchState::new(ctx);
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = match self
                .apply(action, ctx, snapshot, workspace_id, token, &mut state)
                .await
            {
                Ok(()) => ActionOutcome::applied(action.action_type),
                Err(e) => {
                    warn!(
                        workspace = workspace_id,
                        action = action.action_type.as_str(),
                        err = %e,
                        "action failed"
                    );
                    ActionOutcome::failed(action.action_type, e)
                }
            };
            self.metrics.record_action(outcome.success);
            outcomes.push(outcome);
        }
        outcomes
    }

    fn dry_run(&self, actions: &[Action]) -> Vec<ActionOutcome> {
        actions
            .iter()
            .map(|action| {
                info!(
                    action = action.action_type.as_str(),
                    args = ?action.args,
                    "dry-run — action would apply"
                );
                let outcome = ActionOutcome::would_apply(action.action_type);
                self.metrics.record_action(true);
                outcome
            })
            .collect()
    }

    async fn apply(
        &self,
        action: &Action,
        ctx: &TimeEntryContext,
        snapshot: &WorkspaceSnapshot,
        workspace_id: &str,
        token: &str,
        state: &mut BatchState,
    ) -> Result<(), ActionError> {
        match action.action_type {
            ActionType::AddTag => {
                let name = action
                    .arg_or("tag", "name")
                    .ok_or(ActionError::MissingArg("tag"))?;
                let tag_id = self
                    .resolve_or_create_tag(workspace_id, name, snapshot, token, state)
                    .await?;
                if state.tag_ids.iter().any(|t| *t == tag_id) {
                    debug!(tag = name, "tag already present — nothing to do");
                    return Ok(());
                }
                state.tag_ids.push(tag_id);
                let patch = json!({ "tagIds": state.tag_ids.clone() });
                self.update_entry(workspace_id, ctx, &patch, token).await
            }
            ActionType::RemoveTag => {
                let name = action
                    .arg_or("tag", "name")
                    .ok_or(ActionError::MissingArg("tag"))?;
                let Some(tag_id) = state
                    .created_tags
                    .get(&crate::cache::workspace::norm(name))
                    .map(String::as_str)
                    .or_else(|| snapshot.tag_id_by_name(name))
                    .map(str::to_string)
                else {
                    debug!(tag = name, "tag unknown — nothing to remove");
                    return Ok(());
                };
                let before = state.tag_ids.len();
                state.tag_ids.retain(|t| *t != tag_id);
                if state.tag_ids.len() == before {
                    return Ok(());
                }
                let patch = json!({ "tagIds": state.tag_ids.clone() });
                self.update_entry(workspace_id, ctx, &patch, token).await
            }
            ActionType::SetDescription => {
                let template = action
                    .arg_or("value", "description")
                    .ok_or(ActionError::MissingArg("value"))?;
                let value = placeholder::resolve(template, ctx, snapshot);
                state.description = value.clone();
                self.update_entry(workspace_id, ctx, &json!({ "description": value }), token)
                    .await
            }
            ActionType::AppendDescription => {
                let template = action
                    .arg_or("value", "description")
                    .ok_or(ActionError::MissingArg("value"))?;
                let suffix = placeholder::resolve(template, ctx, snapshot);
                let value = format!("{}{}", state.description, suffix);
                state.description = value.clone();
                self.update_entry(workspace_id, ctx, &json!({ "description": value }), token)
                    .await
            }
            ActionType::PrependDescription => {
                let template = action
                    .arg_or("value", "description")
                    .ok_or(ActionError::MissingArg("value"))?;
                let prefix = placeholder::resolve(template, ctx, snapshot);
                let value = format!("{}{}", prefix, state.description);
                state.description = value.clone();
                self.update_entry(workspace_id, ctx, &json!({ "description": value }), token)
                    .await
            }
            ActionType::SetBillable => {
                let raw = action
                    .arg_or("value", "billable")
                    .ok_or(ActionError::MissingArg("value"))?;
                let desired = raw.eq_ignore_ascii_case("true") || raw == "1";
                self.update_entry(workspace_id, ctx, &json!({ "billable": desired }), token)
                    .await
            }
            ActionType::SetProjectById => {
                let project_id = action
                    .arg("projectId")
                    .ok_or(ActionError::MissingArg("projectId"))?;
                state.pending_project = Some(project_id.to_string());
                self.update_entry(workspace_id, ctx, &json!({ "projectId": project_id }), token)
                    .await
            }
            ActionType::SetProjectByName => {
                let name = action
                    .arg_or("name", "project")
                    .ok_or(ActionError::MissingArg("name"))?;
                let project_id = snapshot
                    .project_id_by_name(name)
                    .ok_or_else(|| ActionError::UnknownProject(name.to_string()))?
                    .to_string();
                state.pending_project = Some(project_id.clone());
                self.update_entry(workspace_id, ctx, &json!({ "projectId": project_id }), token)
                    .await
            }
            ActionType::SetTaskById => {
                let task_id = action
                    .arg("taskId")
                    .ok_or(ActionError::MissingArg("taskId"))?;
                self.update_entry(workspace_id, ctx, &json!({ "taskId": task_id }), token)
                    .await
            }
            ActionType::SetTaskByName => {
                let name = action
                    .arg_or("name", "task")
                    .ok_or(ActionError::MissingArg("name"))?;
                // Resolve under the project set earlier in this batch, else
                // the project named in the payload, else any project.
                let project_name = state
                    .pending_project
                    .as_deref()
                    .and_then(|pid| snapshot.project_name(pid))
                    .or_else(|| ctx.embedded_project_name());
                let task_id = snapshot
                    .task_id_by_name(project_name, name)
                    .ok_or_else(|| ActionError::UnknownTask(name.to_string()))?
                    .to_string();
                self.update_entry(workspace_id, ctx, &json!({ "taskId": task_id }), token)
                    .await
            }
            ActionType::OpenapiCall => {
                self.openapi_call(action, ctx, snapshot, workspace_id, token)
                    .await
            }
        }
    }

    /// Tag lookup with create-if-missing fallback. Newly created tags are
    /// remembered for the rest of the batch and pushed into the workspace
    /// cache for later events.
    async fn resolve_or_create_tag(
        &self,
        workspace_id: &str,
        name: &str,
        snapshot: &WorkspaceSnapshot,
        token: &str,
        state: &mut BatchState,
    ) -> Result<String, ActionError> {
        let key = crate::cache::workspace::norm(name);
        if let Some(id) = state.created_tags.get(&key) {
            return Ok(id.clone());
        }
        if let Some(id) = snapshot.tag_id_by_name(name) {
            return Ok(id.to_string());
        }

        info!(workspace = workspace_id, tag = name, "tag not found — creating");
        let created = retry_with_backoff(
            &self.backoff,
            |e: &ApiError| e.retry_decision(false),
            || self.api.create_tag(workspace_id, name, token),
        )
        .await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::TagCreateFailed(name.to_string()))?
            .to_string();
        state.created_tags.insert(key, id.clone());
        self.cache.insert_tag(workspace_id, &id, name).await;
        Ok(id)
    }

    async fn update_entry(
        &self,
        workspace_id: &str,
        ctx: &TimeEntryContext,
        patch: &Value,
        token: &str,
    ) -> Result<(), ActionError> {
        let entry_id = ctx.entry_id().ok_or(ActionError::MissingEntryId)?;
        retry_with_backoff(
            &self.backoff,
            |e: &ApiError| e.retry_decision(false),
            || self.api.update_time_entry(workspace_id, entry_id, patch, token),
        )
        .await?;
        Ok(())
    }

    /// Generic API call, guarded: GET/POST only, and the resolved path must
    /// stay inside the calling workspace. Both checks run before any network
    /// traffic.
    async fn openapi_call(
        &self,
        action: &Action,
        ctx: &TimeEntryContext,
        snapshot: &WorkspaceSnapshot,
        workspace_id: &str,
        token: &str,
    ) -> Result<(), ActionError> {
        let method = match action.arg("method").map(str::to_ascii_uppercase) {
            Some(m) if m == "GET" => CallMethod::Get,
            Some(m) if m == "POST" => CallMethod::Post,
            Some(other) => return Err(ActionError::MethodNotAllowed(other)),
            None => return Err(ActionError::MissingArg("method")),
        };
        let template = action.arg("path").ok_or(ActionError::MissingArg("path"))?;
        let path = placeholder::resolve_path(template, ctx, snapshot);

        let prefix = format!("/workspaces/{workspace_id}");
        let in_workspace = path == prefix || path.starts_with(&format!("{prefix}/"));
        if !in_workspace || path.contains("..") {
            return Err(ActionError::PathOutsideWorkspace);
        }

        let body = match action.arg("body") {
            Some(raw) => {
                let template: Value =
                    serde_json::from_str(raw).map_err(ActionError::InvalidBody)?;
                Some(placeholder::resolve_json(&template, ctx, snapshot))
            }
            None => None,
        };

        let idempotent = method == CallMethod::Get;
        debug!(%method, %path, "executing openapi_call");
        retry_with_backoff(
            &self.backoff,
            |e: &ApiError| e.retry_decision(idempotent),
            || self.api.call(method, &path, body.as_ref(), token),
        )
        .await?;
        Ok(())
    }
}

/// Mutable view of the entry as this batch has changed it so far.
struct BatchState {
    tag_ids: Vec<String>,
    description: String,
    pending_project: Option<String>,
    /// Normalized name → id for tags created during this batch.
    created_tags: HashMap<String, String>,
}

impl BatchState {
    fn new(ctx: &TimeEntryContext) -> Self {
        Self {
            tag_ids: ctx.tag_ids(),
            description: ctx.description().to_string(),
            pending_project: None,
            created_tags: HashMap::new(),
        }
    }
}
