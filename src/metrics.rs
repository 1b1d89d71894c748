// SPDX-License-Identifier: MIT
//! In-process counters exposed as `GET /metrics` in Prometheus text format.
//!
//! No external library needed — counters are `AtomicU64` incremented inline,
//! plus one fixed-bucket histogram for webhook processing latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Upper bucket bounds (milliseconds) for `webhook_latency_ms`.
const LATENCY_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000];

/// Fixed-bucket latency histogram.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    /// Observations above the last bound.
    overflow: AtomicU64,
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    pub fn observe_ms(&self, ms: u64) {
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if ms <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        if ms > LATENCY_BUCKETS_MS[LATENCY_BUCKETS_MS.len() - 1] {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Render as cumulative Prometheus histogram lines.
    fn render(&self, name: &str, out: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(out, "# HELP {name} Webhook processing latency.");
        let _ = writeln!(out, "# TYPE {name} histogram");
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        cumulative += self.overflow.load(Ordering::Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
        let _ = writeln!(out, "{name}_sum {}", self.sum_ms.load(Ordering::Relaxed));
        let _ = writeln!(out, "{name}_count {}", self.count.load(Ordering::Relaxed));
    }
}

/// Engine-wide performance counters shared across all workers.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Rules evaluated across all webhook events.
    pub rules_evaluated: AtomicU64,
    /// Rules that matched their event's context.
    pub rules_matched: AtomicU64,
    /// Actions that completed successfully (live or dry-run).
    pub actions_success: AtomicU64,
    /// Actions that failed.
    pub actions_failure: AtomicU64,
    /// Duplicate webhook deliveries suppressed by the idempotency cache.
    pub dedup_hits: AtomicU64,
    /// Webhook deliveries accepted as new work.
    pub dedup_misses: AtomicU64,
    /// Action batches dispatched to the async pool.
    pub async_dispatched: AtomicU64,
    /// Action batches that fell back to synchronous execution (pool full).
    pub async_fallback_sync: AtomicU64,
    /// Workspace cache loads that hit a per-dataset cap, by dataset.
    pub cache_truncated_tags: AtomicU64,
    pub cache_truncated_projects: AtomicU64,
    pub cache_truncated_clients: AtomicU64,
    pub cache_truncated_users: AtomicU64,
    pub cache_truncated_tasks: AtomicU64,
    /// Webhook processing latency.
    pub webhook_latency: LatencyHistogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_evaluation(&self, evaluated: u64, matched: u64) {
        self.rules_evaluated.fetch_add(evaluated, Ordering::Relaxed);
        self.rules_matched.fetch_add(matched, Ordering::Relaxed);
    }

    pub fn record_action(&self, success: bool) {
        if success {
            self.actions_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_miss(&self) {
        self.dedup_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_dispatched(&self) {
        self.async_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_fallback(&self) {
        self.async_fallback_sync.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_truncated(&self, dataset: &str) {
        let counter = match dataset {
            "tags" => &self.cache_truncated_tags,
            "projects" => &self.cache_truncated_projects,
            "clients" => &self.cache_truncated_clients,
            "users" => &self.cache_truncated_users,
            _ => &self.cache_truncated_tasks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render all counters in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        counter(
            &mut out,
            "rules_evaluated_total",
            "Rules evaluated across webhook events.",
            &[("", self.rules_evaluated.load(Ordering::Relaxed))],
        );
        counter(
            &mut out,
            "rules_matched_total",
            "Rules that matched during webhook evaluation.",
            &[("", self.rules_matched.load(Ordering::Relaxed))],
        );
        counter(
            &mut out,
            "rules_actions_total",
            "Actions executed, by result.",
            &[
                (
                    "{result=\"success\"}",
                    self.actions_success.load(Ordering::Relaxed),
                ),
                (
                    "{result=\"failure\"}",
                    self.actions_failure.load(Ordering::Relaxed),
                ),
            ],
        );
        counter(
            &mut out,
            "webhook_dedup_hits_total",
            "Duplicate webhook deliveries suppressed.",
            &[("", self.dedup_hits.load(Ordering::Relaxed))],
        );
        counter(
            &mut out,
            "webhook_dedup_misses_total",
            "Webhook deliveries accepted as new work.",
            &[("", self.dedup_misses.load(Ordering::Relaxed))],
        );
        counter(
            &mut out,
            "async_backlog_total",
            "Async action batches, by dispatch outcome.",
            &[
                (
                    "{outcome=\"dispatched\"}",
                    self.async_dispatched.load(Ordering::Relaxed),
                ),
                (
                    "{outcome=\"fallback_sync\"}",
                    self.async_fallback_sync.load(Ordering::Relaxed),
                ),
            ],
        );
        counter(
            &mut out,
            "workspace_cache_truncated_total",
            "Workspace cache loads that hit a per-dataset cap.",
            &[
                (
                    "{dataset=\"tags\"}",
                    self.cache_truncated_tags.load(Ordering::Relaxed),
                ),
                (
                    "{dataset=\"projects\"}",
                    self.cache_truncated_projects.load(Ordering::Relaxed),
                ),
                (
                    "{dataset=\"clients\"}",
                    self.cache_truncated_clients.load(Ordering::Relaxed),
                ),
                (
                    "{dataset=\"users\"}",
                    self.cache_truncated_users.load(Ordering::Relaxed),
                ),
                (
                    "{dataset=\"tasks\"}",
                    self.cache_truncated_tasks.load(Ordering::Relaxed),
                ),
            ],
        );
        self.webhook_latency.render("webhook_latency_ms", &mut out);
        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, series: &[(&str, u64)]) {
    use std::fmt::Write as _;
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (labels, value) in series {
        let _ = writeln!(out, "{name}{labels} {value}");
    }
}

/// Shared handle — cheaply clonable.
pub type SharedMetrics = Arc<EngineMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_with_labels() {
        let m = EngineMetrics::new();
        m.record_action(true);
        m.record_action(false);
        m.record_action(false);
        m.record_dedup_hit();
        m.record_cache_truncated("tasks");

        let text = m.render_prometheus();
        assert!(text.contains("rules_actions_total{result=\"success\"} 1"));
        assert!(text.contains("rules_actions_total{result=\"failure\"} 2"));
        assert!(text.contains("webhook_dedup_hits_total 1"));
        assert!(text.contains("workspace_cache_truncated_total{dataset=\"tasks\"} 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let m = EngineMetrics::new();
        m.webhook_latency.observe_ms(3);
        m.webhook_latency.observe_ms(40);
        m.webhook_latency.observe_ms(9_000);

        let text = m.render_prometheus();
        assert!(text.contains("webhook_latency_ms_bucket{le=\"5\"} 1"));
        assert!(text.contains("webhook_latency_ms_bucket{le=\"50\"} 2"));
        assert!(text.contains("webhook_latency_ms_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("webhook_latency_ms_count 3"));
    }
}
