// SPDX-License-Identifier: MIT
//! In-memory caches: webhook idempotency and workspace metadata snapshots.

pub mod idempotency;
pub mod workspace;

pub use idempotency::{derive_dedup_key, DedupOutcome, IdempotencyCache};
pub use workspace::{WorkspaceCache, WorkspaceSnapshot};
