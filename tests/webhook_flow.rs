//! End-to-end webhook pipeline tests: dedup, evaluation, execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use rulesd::client::{ApiError, CallMethod, TrackerApi};
use rulesd::config::EngineConfig;
use rulesd::engine::orchestrator::{WebhookEvent, WebhookStatus};
use rulesd::rules::model::Rule;
use rulesd::rules::store::{InMemoryRuleStore, RuleStore};
use rulesd::EngineContext;

// ─── Scripted API ─────────────────────────────────────────────────────────────

/// Fake external API: fixed workspace listings, recorded mutations.
#[derive(Default)]
struct ScriptedApi {
    tags: Mutex<Vec<Value>>,
    clients: Mutex<Vec<Value>>,
    calls: Mutex<Vec<String>>,
    network_calls: AtomicUsize,
}

impl ScriptedApi {
    fn record(&self, call: impl Into<String>) {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count_of(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl TrackerApi for ScriptedApi {
    async fn get_time_entry(&self, _: &str, id: &str, _: &str) -> Result<Value, ApiError> {
        self.record(format!("get_entry {id}"));
        Ok(json!({"id": id}))
    }
    async fn update_time_entry(
        &self,
        _: &str,
        id: &str,
        patch: &Value,
        _: &str,
    ) -> Result<Value, ApiError> {
        self.record(format!("update {id} {patch}"));
        Ok(patch.clone())
    }
    async fn list_tags(&self, _: &str, page: usize, _: &str) -> Result<Vec<Value>, ApiError> {
        self.record("list_tags");
        Ok(if page == 1 {
            self.tags.lock().unwrap().clone()
        } else {
            vec![]
        })
    }
    async fn create_tag(&self, _: &str, name: &str, _: &str) -> Result<Value, ApiError> {
        self.record(format!("create_tag {name}"));
        Ok(json!({"id": format!("tag-{name}"), "name": name}))
    }
    async fn list_projects(&self, _: &str, _: usize, _: &str) -> Result<Vec<Value>, ApiError> {
        self.record("list_projects");
        Ok(vec![])
    }
    async fn list_clients(&self, _: &str, page: usize, _: &str) -> Result<Vec<Value>, ApiError> {
        self.record("list_clients");
        Ok(if page == 1 {
            self.clients.lock().unwrap().clone()
        } else {
            vec![]
        })
    }
    async fn list_users(&self, _: &str, _: usize, _: &str) -> Result<Vec<Value>, ApiError> {
        self.record("list_users");
        Ok(vec![])
    }
    async fn list_tasks(
        &self,
        _: &str,
        _: &str,
        _: usize,
        _: &str,
    ) -> Result<Vec<Value>, ApiError> {
        Ok(vec![])
    }
    async fn call(
        &self,
        method: CallMethod,
        path: &str,
        _: Option<&Value>,
        _: &str,
    ) -> Result<String, ApiError> {
        self.record(format!("call {method} {path}"));
        Ok(String::new())
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

async fn engine(apply_changes: bool, api: Arc<ScriptedApi>) -> Arc<EngineContext> {
    let config = EngineConfig {
        apply_changes,
        ..EngineConfig::default()
    };
    config.validate().expect("test config is valid");
    EngineContext::build(config, api, Arc::new(InMemoryRuleStore::new()))
}

async fn save_rule(ctx: &EngineContext, rule: Value) -> Rule {
    let rule: Rule = serde_json::from_value(rule).expect("rule json");
    ctx.store.save("ws1", rule).await.expect("save rule")
}

fn meeting_webhook(payload_id: &str) -> WebhookEvent {
    WebhookEvent {
        event_type: "NEW_TIME_ENTRY".into(),
        workspace_id: "ws1".into(),
        payload_id: Some(payload_id.into()),
        payload: json!({
            "workspaceId": "ws1",
            "timeEntry": {
                "id": "te1",
                "description": "Team meeting",
                "tagIds": [],
                "billable": true
            }
        }),
    }
}

/// Poll until `pred` holds over the recorded calls, panicking after ~2s.
async fn wait_until(api: &ScriptedApi, what: &str, pred: impl Fn(&ScriptedApi) -> bool) {
    for _ in 0..200 {
        if pred(api) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}; calls={:?}", api.calls());
}

// ─── Scenario A — match and apply ────────────────────────────────────────────

#[tokio::test]
async fn matching_rule_applies_add_tag_once() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "tag meetings",
            "combinator": "AND",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }),
    )
    .await;

    let reply = ctx.orchestrator.handle(meeting_webhook("p1")).await;
    assert_eq!(reply.status, WebhookStatus::Scheduled);
    assert_eq!(reply.actions_count, 1);

    wait_until(&api, "tag applied", |api| api.count_of("update te1") == 1).await;
    assert_eq!(api.count_of("create_tag meetings"), 1);
    let update = api
        .calls()
        .into_iter()
        .find(|c| c.starts_with("update te1"))
        .unwrap();
    assert!(update.contains("tag-meetings"));
}

// ─── Scenario B — duplicate delivery ─────────────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_executes_actions_once() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "tag meetings",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }),
    )
    .await;

    let first = ctx.orchestrator.handle(meeting_webhook("same-id")).await;
    assert_eq!(first.status, WebhookStatus::Scheduled);
    wait_until(&api, "first delivery applied", |api| {
        api.count_of("update te1") == 1
    })
    .await;

    // Identical delivery within the TTL window.
    let second = ctx.orchestrator.handle(meeting_webhook("same-id")).await;
    assert_eq!(second.status, WebhookStatus::Duplicate);

    // Give any stray async work a moment, then confirm nothing else ran.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.count_of("update te1"), 1, "add_tag must run exactly once");
    assert_eq!(ctx.metrics.dedup_hits.load(Ordering::Relaxed), 1);
}

// ─── Scenario C — OR combinator via client name ──────────────────────────────

#[tokio::test]
async fn or_rule_matches_via_client_name() {
    let api = Arc::new(ScriptedApi::default());
    *api.clients.lock().unwrap() = vec![json!({"id": "c1", "name": "ACME Corp"})];
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "acme watcher",
            "combinator": "OR",
            "conditions": [
                {"type": "isBillable", "value": "true"},
                {"type": "clientNameContains", "value": "ACME"}
            ],
            "actions": [{"type": "add_tag", "args": {"tag": "acme"}}]
        }),
    )
    .await;

    let reply = ctx
        .orchestrator
        .handle(WebhookEvent {
            event_type: "NEW_TIME_ENTRY".into(),
            workspace_id: "ws1".into(),
            payload_id: Some("p-acme".into()),
            payload: json!({
                "workspaceId": "ws1",
                "timeEntry": {
                    "id": "te2",
                    "description": "quarterly review",
                    "billable": false,
                    "clientId": "c1",
                    "tagIds": []
                }
            }),
        })
        .await;

    assert_eq!(reply.status, WebhookStatus::Scheduled);
    wait_until(&api, "acme tag applied", |api| api.count_of("update te2") == 1).await;
}

// ─── Scenario D — invalid TTL fails startup ──────────────────────────────────

#[test]
fn ttl_below_minimum_fails_configuration() {
    let config = EngineConfig {
        dedup_ttl_secs: 30,
        ..EngineConfig::default()
    };
    let err = config.validate().expect_err("30s TTL must be rejected");
    assert!(err.to_string().contains("60"));
}

// ─── Dry-run ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dry_run_logs_actions_without_network_calls() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(false, api.clone()).await;
    save_rule(
        &ctx,
        json!({
            "name": "tag meetings",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }),
    )
    .await;

    let reply = ctx.orchestrator.handle(meeting_webhook("p-dry")).await;
    assert_eq!(reply.status, WebhookStatus::Logged);
    let summary = reply.summary.expect("dry-run records would-apply outcomes");
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(api.network_calls.load(Ordering::SeqCst), 0);
}

// ─── Short-circuit and policy paths ──────────────────────────────────────────

#[tokio::test]
async fn event_with_no_rules_short_circuits() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    let reply = ctx.orchestrator.handle(meeting_webhook("p-none")).await;
    assert_eq!(reply.status, WebhookStatus::NoRules);
    assert_eq!(api.network_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_rule_does_not_fire() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "dormant",
            "enabled": false,
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "never"}}]
        }),
    )
    .await;

    let reply = ctx.orchestrator.handle(meeting_webhook("p-disabled")).await;
    assert_eq!(reply.status, WebhookStatus::NoMatch);
}

#[tokio::test]
async fn rule_scoped_to_other_event_does_not_fire() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "updates only",
            "triggerEvent": "TIME_ENTRY_UPDATED",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "updated"}}]
        }),
    )
    .await;

    // Delivery is NEW_TIME_ENTRY; the only rule wants TIME_ENTRY_UPDATED.
    let reply = ctx.orchestrator.handle(meeting_webhook("p-scoped")).await;
    assert_eq!(reply.status, WebhookStatus::NoRules);
}

#[tokio::test]
async fn missing_token_skips_mutations() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    save_rule(
        &ctx,
        json!({
            "name": "tag meetings",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }),
    )
    .await;

    let reply = ctx.orchestrator.handle(meeting_webhook("p-token")).await;
    assert_eq!(reply.status, WebhookStatus::MissingToken);
    assert_eq!(api.count_of("update"), 0);
}

#[tokio::test]
async fn distinct_payloads_are_both_processed() {
    let api = Arc::new(ScriptedApi::default());
    let ctx = engine(true, api.clone()).await;
    ctx.tokens.put("ws1", "tok");
    save_rule(
        &ctx,
        json!({
            "name": "tag meetings",
            "conditions": [{"type": "descriptionContains", "value": "meeting"}],
            "actions": [{"type": "add_tag", "args": {"tag": "meetings"}}]
        }),
    )
    .await;

    let a = ctx.orchestrator.handle(meeting_webhook("p-a")).await;
    let b = ctx.orchestrator.handle(meeting_webhook("p-b")).await;
    assert_eq!(a.status, WebhookStatus::Scheduled);
    assert_eq!(b.status, WebhookStatus::Scheduled);
    wait_until(&api, "both deliveries applied", |api| {
        api.count_of("update te1") == 2
    })
    .await;
}
