// SPDX-License-Identifier: MIT
//! Condition evaluation — decides whether a rule matches a time entry.
//!
//! Fail-closed: a condition whose required payload field is missing evaluates
//! false and never aborts sibling rules. Name-based conditions resolve ids
//! through the workspace snapshot, falling back to names embedded in the
//! payload.

use tracing::debug;

use crate::cache::workspace::WorkspaceSnapshot;
use crate::engine::context::TimeEntryContext;
use crate::rules::model::{Combinator, Condition, ConditionType, Rule};

/// Evaluate a rule against a time entry.
///
/// Disabled rules never match. An empty condition list never matches — a
/// rule with no conditions is not a catch-all. `And` short-circuits on the
/// first failing condition, `Or` on the first passing one.
pub fn matches(rule: &Rule, ctx: &TimeEntryContext, snapshot: &WorkspaceSnapshot) -> bool {
    if !rule.enabled {
        return false;
    }
    if rule.conditions.is_empty() {
        return false;
    }

    let is_and = rule.combinator == Combinator::And;
    for condition in &rule.conditions {
        let hit = condition_matches(condition, ctx, snapshot);
        if is_and && !hit {
            return false;
        }
        if !is_and && hit {
            return true;
        }
    }
    // And: every condition passed. Or: none did.
    is_and
}

fn condition_matches(
    condition: &Condition,
    ctx: &TimeEntryContext,
    snapshot: &WorkspaceSnapshot,
) -> bool {
    let value = condition.value.as_str();
    match condition.condition_type {
        ConditionType::DescriptionContains => contains_ci(ctx.description(), value),
        ConditionType::DescriptionEquals => ctx.description() == value,
        ConditionType::HasTag => ctx.tag_ids().iter().any(|tag| tag == value),
        ConditionType::ProjectIdEquals => ctx.project_id() == Some(value),
        ConditionType::ProjectNameContains => match project_name(ctx, snapshot) {
            Some(name) => contains_ci(name, value),
            None => {
                debug!("projectNameContains: no project name available — no match");
                false
            }
        },
        ConditionType::ClientIdEquals => ctx.client_id() == Some(value),
        ConditionType::ClientNameContains => match client_name(ctx, snapshot) {
            Some(name) => contains_ci(name, value),
            None => {
                debug!("clientNameContains: no client name available — no match");
                false
            }
        },
        ConditionType::IsBillable => {
            let expected = value.eq_ignore_ascii_case("true") || value == "1";
            ctx.billable() == expected
        }
    }
}

fn project_name<'a>(ctx: &'a TimeEntryContext, snapshot: &'a WorkspaceSnapshot) -> Option<&'a str> {
    ctx.project_id()
        .and_then(|id| snapshot.project_name(id))
        .or_else(|| ctx.embedded_project_name())
}

fn client_name<'a>(ctx: &'a TimeEntryContext, snapshot: &'a WorkspaceSnapshot) -> Option<&'a str> {
    ctx.client_id()
        .and_then(|id| snapshot.client_name(id))
        .or_else(|| ctx.embedded_client_name())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
