// SPDX-License-Identifier: MIT
//! Webhook orchestration — the pipeline behind every inbound event.
//!
//! `Received → Deduped → RulesLoaded → Evaluated → ActionsExecuted →
//! Responded`. Duplicates short-circuit right after the dedup check. Matched
//! actions go to the bounded async pool; a saturated pool falls back to
//! synchronous execution on the calling task rather than rejecting the
//! event. The reply is always prompt, whatever the path.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::idempotency::{derive_dedup_key, DedupOutcome, IdempotencyCache};
use crate::cache::workspace::WorkspaceSnapshot;
use crate::cache::WorkspaceCache;
use crate::engine::context::TimeEntryContext;
use crate::engine::evaluator;
use crate::engine::executor::{ActionExecutor, ExecutionSummary};
use crate::engine::pool::{ActionJob, ActionPool};
use crate::health::Readiness;
use crate::metrics::SharedMetrics;
use crate::rules::model::Action;
use crate::rules::store::RuleStore;
use crate::tokens::TokenStore;

/// An authenticated inbound webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub workspace_id: String,
    /// Explicit delivery identity; derived from the payload when absent.
    pub payload_id: Option<String>,
    pub payload: Value,
}

/// Terminal state of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Suppressed by the idempotency cache.
    Duplicate,
    /// Workspace has no enabled rules for this event.
    NoRules,
    /// Rules evaluated; none matched.
    NoMatch,
    /// Dry-run: matched actions logged, none performed.
    Logged,
    /// Actions queued on the async pool.
    Scheduled,
    /// Actions ran synchronously; all succeeded.
    Applied,
    /// Actions ran synchronously; some failed.
    Partial,
    /// Workspace has no installation token — mutations skipped.
    MissingToken,
    /// Orchestrator-level failure (rule store unreachable).
    Failed,
}

/// Reply returned to the delivery system.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReply {
    pub event: String,
    pub status: WebhookStatus,
    pub actions_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
}

impl WebhookReply {
    fn new(event: &str, status: WebhookStatus) -> Self {
        Self {
            event: event.to_string(),
            status,
            actions_count: 0,
            summary: None,
        }
    }

    fn with_actions(mut self, count: usize) -> Self {
        self.actions_count = count;
        self
    }

    fn with_summary(mut self, summary: ExecutionSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Pipeline tying dedup, rule store, evaluator, and executor together.
///
/// All collaborators are injected — constructed once at startup and shared.
pub struct Orchestrator {
    store: Arc<dyn RuleStore>,
    dedup: Arc<IdempotencyCache>,
    cache: Arc<WorkspaceCache>,
    executor: Arc<ActionExecutor>,
    tokens: Arc<TokenStore>,
    pool: ActionPool,
    metrics: SharedMetrics,
    readiness: Arc<Readiness>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RuleStore>,
        dedup: Arc<IdempotencyCache>,
        cache: Arc<WorkspaceCache>,
        executor: Arc<ActionExecutor>,
        tokens: Arc<TokenStore>,
        pool: ActionPool,
        metrics: SharedMetrics,
        readiness: Arc<Readiness>,
    ) -> Self {
        Self {
            store,
            dedup,
            cache,
            executor,
            tokens,
            pool,
            metrics,
            readiness,
        }
    }

    /// Process one delivery and reply promptly.
    pub async fn handle(&self, event: WebhookEvent) -> WebhookReply {
        let started = Instant::now();
        let reply = self.process(event).await;
        self.metrics
            .webhook_latency
            .observe_ms(started.elapsed().as_millis() as u64);
        reply
    }

    async fn process(&self, event: WebhookEvent) -> WebhookReply {
        let event_type = event.event_type.as_str();
        let workspace_id = event.workspace_id.as_str();

        // Dedup first — a duplicate must not touch rules or actions.
        let payload_id = event
            .payload_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| derive_dedup_key(&event.payload));
        match payload_id {
            Some(pid) => {
                if self.dedup.check_and_insert(workspace_id, event_type, &pid)
                    == DedupOutcome::Duplicate
                {
                    info!(workspace = workspace_id, event = event_type, "duplicate webhook suppressed");
                    self.metrics.record_dedup_hit();
                    return WebhookReply::new(event_type, WebhookStatus::Duplicate);
                }
                self.metrics.record_dedup_miss();
            }
            None => {
                // No derivable identity: process rather than drop.
                debug!(workspace = workspace_id, event = event_type, "payload has no dedup identity");
                self.metrics.record_dedup_miss();
            }
        }

        let rules = match self.store.get_enabled(workspace_id).await {
            Ok(rules) => {
                self.readiness.mark_ready();
                rules
            }
            Err(e) => {
                warn!(workspace = workspace_id, err = %e, "rule store unavailable");
                self.readiness.mark_degraded();
                return WebhookReply::new(event_type, WebhookStatus::Failed);
            }
        };

        let applicable: Vec<_> = rules
            .into_iter()
            .filter(|rule| rule.applies_to(event_type))
            .collect();
        if applicable.is_empty() {
            debug!(workspace = workspace_id, event = event_type, "no enabled rules for event");
            return WebhookReply::new(event_type, WebhookStatus::NoRules);
        }

        let ctx = TimeEntryContext::new(event.payload);
        let token = self.tokens.get(workspace_id);
        let snapshot = self.snapshot_for(workspace_id, token.as_deref()).await;

        // Evaluate in store order; no priority field exists.
        let mut actions: Vec<Action> = Vec::new();
        let mut matched = 0u64;
        for rule in &applicable {
            if evaluator::matches(rule, &ctx, &snapshot) {
                info!(workspace = workspace_id, rule = %rule.name, "rule matched");
                matched += 1;
                actions.extend(rule.actions.iter().cloned());
            }
        }
        self.metrics.record_evaluation(applicable.len() as u64, matched);

        if actions.is_empty() {
            return WebhookReply::new(event_type, WebhookStatus::NoMatch);
        }

        if !self.executor.apply_changes() {
            // Dry-run needs no token: nothing is sent anywhere.
            let outcomes = self
                .executor
                .execute(&actions, &ctx, &snapshot, workspace_id, "")
                .await;
            return WebhookReply::new(event_type, WebhookStatus::Logged)
                .with_actions(actions.len())
                .with_summary(ExecutionSummary::of(&outcomes));
        }

        let Some(token) = token else {
            warn!(workspace = workspace_id, "missing installation token — skipping mutations");
            return WebhookReply::new(event_type, WebhookStatus::MissingToken)
                .with_actions(actions.len());
        };

        let action_count = actions.len();
        let job = ActionJob {
            workspace_id: workspace_id.to_string(),
            token,
            ctx,
            snapshot,
            actions,
        };
        match self.pool.try_dispatch(job) {
            Ok(()) => {
                self.metrics.record_async_dispatched();
                WebhookReply::new(event_type, WebhookStatus::Scheduled).with_actions(action_count)
            }
            Err(job) => {
                // Pool saturated: run on the calling task instead of
                // rejecting the event.
                warn!(workspace = workspace_id, "action pool saturated — executing synchronously");
                self.metrics.record_async_fallback();
                let outcomes = self
                    .executor
                    .execute(
                        &job.actions,
                        &job.ctx,
                        &job.snapshot,
                        &job.workspace_id,
                        &job.token,
                    )
                    .await;
                let summary = ExecutionSummary::of(&outcomes);
                let status = if summary.failed == 0 {
                    WebhookStatus::Applied
                } else {
                    WebhookStatus::Partial
                };
                WebhookReply::new(event_type, status)
                    .with_actions(action_count)
                    .with_summary(summary)
            }
        }
    }

    /// Workspace snapshot for evaluation/templating. A failed load degrades
    /// to whatever snapshot exists (possibly empty) — name-based features
    /// miss, the event still processes.
    async fn snapshot_for(
        &self,
        workspace_id: &str,
        token: Option<&str>,
    ) -> Arc<WorkspaceSnapshot> {
        match token {
            Some(token) => match self.cache.get(workspace_id, token).await {
                Ok(snap) => snap,
                Err(e) => {
                    warn!(workspace = workspace_id, err = %e, "workspace cache load failed — degrading");
                    self.cache
                        .peek(workspace_id)
                        .await
                        .unwrap_or_else(WorkspaceSnapshot::empty)
                }
            },
            None => self
                .cache
                .peek(workspace_id)
                .await
                .unwrap_or_else(WorkspaceSnapshot::empty),
        }
    }
}
