// SPDX-License-Identifier: MIT
//! Bounded worker pool for asynchronous action execution.
//!
//! The webhook path hands matched actions to this pool so the delivery
//! system gets a fast acknowledgment. The queue is bounded; when it is full
//! the caller runs the batch synchronously instead of rejecting the event
//! (availability over latency). Jobs are not cancellable once accepted.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::cache::workspace::WorkspaceSnapshot;
use crate::engine::context::TimeEntryContext;
use crate::engine::executor::{ActionExecutor, ExecutionSummary};
use crate::rules::model::Action;

/// One batch of matched actions for one webhook event.
pub struct ActionJob {
    pub workspace_id: String,
    pub token: String,
    pub ctx: TimeEntryContext,
    pub snapshot: Arc<WorkspaceSnapshot>,
    pub actions: Vec<Action>,
}

/// Bounded dispatch queue feeding a fixed set of worker tasks.
pub struct ActionPool {
    tx: mpsc::Sender<ActionJob>,
}

impl ActionPool {
    /// Spawn `workers` tasks draining a queue of `depth` jobs.
    pub fn start(workers: usize, depth: usize, executor: Arc<ActionExecutor>) -> Self {
        let (tx, rx) = mpsc::channel::<ActionJob>(depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let executor = executor.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        debug!(worker_id, "action pool queue closed — worker exiting");
                        break;
                    };
                    run_job(&executor, job).await;
                }
            });
        }

        Self { tx }
    }

    /// Queue a job without blocking. Returns the job back when the queue is
    /// full (or closed) so the caller can run it synchronously.
    pub fn try_dispatch(&self, job: ActionJob) -> Result<(), ActionJob> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => job,
            mpsc::error::TrySendError::Closed(job) => job,
        })
    }
}

async fn run_job(executor: &ActionExecutor, job: ActionJob) {
    let outcomes = executor
        .execute(
            &job.actions,
            &job.ctx,
            &job.snapshot,
            &job.workspace_id,
            &job.token,
        )
        .await;
    let summary = ExecutionSummary::of(&outcomes);
    info!(
        workspace = %job.workspace_id,
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "async action batch finished"
    );
}
