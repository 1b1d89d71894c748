// SPDX-License-Identifier: MIT
//! Webhook idempotency cache — TTL dedup keyed by delivery identity.
//!
//! `check_and_insert` is an atomic insert-if-absent: of two racing deliveries
//! of the same payload, exactly one wins `Unique`. Entries are process-local,
//! so this provides at-most-once-per-process semantics only; a multi-replica
//! deployment needs a shared store behind the same call.
//!
//! Expired entries are replaced lazily on access; a periodic sweep bounds
//! memory between accesses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{MAX_DEDUP_TTL_SECS, MIN_DEDUP_TTL_SECS};

/// How often the background sweep purges expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Payload fields probed (in order) for a delivery identity when the
/// delivery carries no explicit payload id.
const PREFERRED_ID_FIELDS: &[&str] = &[
    "payloadId",
    "eventId",
    "id",
    "timeEntryId",
    "timeEntry.id",
    "projectId",
    "clientId",
    "taskId",
    "userId",
    "webhookId",
];

/// Outcome of a dedup check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First delivery for this key within the TTL window — process it.
    Unique,
    /// Seen before within the TTL window — suppress it.
    Duplicate,
}

pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl IdempotencyCache {
    /// Create a cache with the given TTL.
    ///
    /// Out-of-range TTLs are rejected by config validation at startup; this
    /// clamps again defensively in case a caller bypasses that path.
    pub fn new(ttl: Duration) -> Self {
        let min = Duration::from_secs(MIN_DEDUP_TTL_SECS);
        let max = Duration::from_secs(MAX_DEDUP_TTL_SECS);
        let clamped = ttl.clamp(min, max);
        if clamped != ttl {
            warn!(
                requested_secs = ttl.as_secs(),
                clamped_secs = clamped.as_secs(),
                "dedup TTL outside allowed range — clamped"
            );
        }
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: clamped,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Atomic insert-if-absent for a delivery key.
    pub fn check_and_insert(
        &self,
        workspace_id: &str,
        event_type: &str,
        payload_id: &str,
    ) -> DedupOutcome {
        self.check_and_insert_at(workspace_id, event_type, payload_id, Instant::now())
    }

    fn check_and_insert_at(
        &self,
        workspace_id: &str,
        event_type: &str,
        payload_id: &str,
        now: Instant,
    ) -> DedupOutcome {
        let key = build_key(workspace_id, event_type, payload_id);
        let expires_at = now + self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some(expiry) if *expiry > now => DedupOutcome::Duplicate,
            _ => {
                // Absent or expired: this caller wins the window.
                entries.insert(key, expires_at);
                DedupOutcome::Unique
            }
        }
    }

    /// Drop all expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "purged expired dedup entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep task. Runs for the life of the process.
    pub fn start_sweeper(cache: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                cache.purge_expired();
            }
        });
    }
}

fn build_key(workspace_id: &str, event_type: &str, payload_id: &str) -> String {
    format!("{workspace_id}|{event_type}|{payload_id}")
}

/// Derive a delivery identity from a payload that carries no explicit id.
///
/// Probes the preferred fields in order, then falls back to the SHA-256 of
/// the serialized body. Returns `None` only for an empty payload.
pub fn derive_dedup_key(payload: &Value) -> Option<String> {
    for field in PREFERRED_ID_FIELDS {
        if let Some(value) = extract_field(payload, field) {
            return Some(value);
        }
    }
    let body = payload.to_string();
    if body == "null" || body == "{}" {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

fn extract_field(payload: &Value, path: &str) -> Option<String> {
    let mut node = payload;
    for part in path.split('.') {
        node = node.get(part)?;
    }
    match node {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
