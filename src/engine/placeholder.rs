// SPDX-License-Identifier: MIT
//! Placeholder resolution for action arguments.
//!
//! Templates contain `{{path}}` tokens with dot-separated paths. The first
//! segment may select a root — `timeEntry`, `project`, `client`, `user`,
//! `workspace` — otherwise the path is walked against the time-entry JSON
//! itself (so `{{description}}` and `{{project.name}}` both work).
//!
//! Unresolved paths render to an empty string with a warning (fail-open): a
//! missing optional field should not abort an otherwise valid action.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::cache::workspace::WorkspaceSnapshot;
use crate::engine::context::TimeEntryContext;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern compiles"));

/// Resolve all placeholders in a template string.
pub fn resolve(template: &str, ctx: &TimeEntryContext, snapshot: &WorkspaceSnapshot) -> String {
    replace(template, ctx, snapshot, |v| v.to_string())
}

/// Resolve placeholders in a URL path template. Substituted values are
/// percent-encoded per segment so a value cannot break the path apart or
/// introduce traversal.
pub fn resolve_path(template: &str, ctx: &TimeEntryContext, snapshot: &WorkspaceSnapshot) -> String {
    replace(template, ctx, snapshot, |v| {
        urlencoding::encode(v).into_owned()
    })
}

/// Resolve placeholders in every string leaf of a JSON template (request
/// bodies for `openapi_call` actions).
pub fn resolve_json(template: &Value, ctx: &TimeEntryContext, snapshot: &WorkspaceSnapshot) -> Value {
    match template {
        Value::String(s) => Value::String(resolve(s, ctx, snapshot)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_json(v, ctx, snapshot)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_json(v, ctx, snapshot)).collect())
        }
        other => other.clone(),
    }
}

fn replace(
    template: &str,
    ctx: &TimeEntryContext,
    snapshot: &WorkspaceSnapshot,
    transform: impl Fn(&str) -> String,
) -> String {
    if template.is_empty() || !template.contains("{{") {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let token = caps.get(0).expect("capture 0 always present");
        let path = caps[1].trim();
        let value = lookup(path, ctx, snapshot).unwrap_or_else(|| {
            warn!(path, "unresolved placeholder — substituting empty string");
            String::new()
        });
        out.push_str(&template[last..token.start()]);
        out.push_str(&transform(&value));
        last = token.end();
    }
    out.push_str(&template[last..]);
    out
}

fn lookup(path: &str, ctx: &TimeEntryContext, snapshot: &WorkspaceSnapshot) -> Option<String> {
    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    };

    match root {
        "timeEntry" => match rest {
            Some(rest) => walk(ctx.entry(), rest),
            None => Some(ctx.entry().to_string()),
        },
        "project" => match rest {
            None | Some("id") => ctx.project_id().map(str::to_string),
            Some("name") => ctx
                .project_id()
                .and_then(|id| snapshot.project_name(id))
                .or_else(|| ctx.embedded_project_name())
                .map(str::to_string),
            Some(rest) => walk(ctx.entry().get("project")?, rest),
        },
        "client" => match rest {
            None | Some("id") => ctx.client_id().map(str::to_string),
            Some("name") => ctx
                .client_id()
                .and_then(|id| snapshot.client_name(id))
                .or_else(|| ctx.embedded_client_name())
                .map(str::to_string),
            _ => None,
        },
        "user" => match rest {
            None | Some("id") => ctx.user_id().map(str::to_string),
            Some("name") => ctx
                .user_id()
                .and_then(|id| snapshot.user_name(id))
                .map(str::to_string),
            _ => None,
        },
        "workspace" => match rest {
            None | Some("id") => ctx.workspace_id().map(str::to_string),
            _ => None,
        },
        // No recognized root: walk the time entry, then the full payload.
        _ => walk(ctx.entry(), path).or_else(|| walk(ctx.payload(), path)),
    }
}

/// Walk a dotted path through a JSON value and render the leaf as text.
fn walk(node: &Value, path: &str) -> Option<String> {
    let mut current = node;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        // Complex values render as JSON.
        other => Some(other.to_string()),
    }
}
