pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod health;
pub mod metrics;
pub mod rest;
pub mod retry;
pub mod rules;
pub mod tokens;

use std::sync::Arc;

use cache::{IdempotencyCache, WorkspaceCache};
use client::TrackerApi;
use config::EngineConfig;
use engine::executor::ActionExecutor;
use engine::orchestrator::Orchestrator;
use engine::pool::ActionPool;
use health::Readiness;
use metrics::{EngineMetrics, SharedMetrics};
use rules::store::RuleStore;
use tokens::TokenStore;

/// Shared engine state passed to every HTTP handler and background task.
///
/// Collaborators are constructed exactly once here and injected — there are
/// no process-wide statics.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: Arc<dyn RuleStore>,
    pub tokens: Arc<TokenStore>,
    pub cache: Arc<WorkspaceCache>,
    pub dedup: Arc<IdempotencyCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: SharedMetrics,
    pub readiness: Arc<Readiness>,
}

impl EngineContext {
    /// Wire the engine together from a validated config and its two external
    /// collaborators (API client and rule store).
    ///
    /// Must run inside a Tokio runtime: the action pool and the idempotency
    /// sweeper spawn background tasks.
    pub fn build(
        config: EngineConfig,
        api: Arc<dyn TrackerApi>,
        store: Arc<dyn RuleStore>,
    ) -> Arc<Self> {
        let metrics: SharedMetrics = Arc::new(EngineMetrics::new());
        let readiness = Arc::new(Readiness::new());
        let tokens = Arc::new(TokenStore::new());

        let cache = Arc::new(WorkspaceCache::new(
            api.clone(),
            config.cache_caps.clone(),
            metrics.clone(),
        ));

        let dedup = Arc::new(IdempotencyCache::new(config.dedup_ttl()));
        IdempotencyCache::start_sweeper(dedup.clone());

        let executor = Arc::new(ActionExecutor::new(
            api,
            cache.clone(),
            metrics.clone(),
            (&config.retry).into(),
            config.apply_changes,
        ));
        let pool = ActionPool::start(config.async_workers, config.async_queue_depth, executor.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            dedup.clone(),
            cache.clone(),
            executor,
            tokens.clone(),
            pool,
            metrics.clone(),
            readiness.clone(),
        ));

        Arc::new(Self {
            config,
            store,
            tokens,
            cache,
            dedup,
            orchestrator,
            metrics,
            readiness,
        })
    }
}
