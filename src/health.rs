// SPDX-License-Identifier: MIT
//! Readiness signal.
//!
//! Orchestrator-level failures (rule store unreachable) mark the engine
//! degraded; the next successful store read clears it. `/health` reports the
//! flag so the upstream delivery system can back off.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Default)]
pub struct Readiness {
    degraded: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    pub fn mark_ready(&self) {
        self.degraded.store(false, Ordering::Relaxed);
    }

    pub fn status(&self) -> ReadinessStatus {
        if self.degraded.load(Ordering::Relaxed) {
            ReadinessStatus::Degraded
        } else {
            ReadinessStatus::Ok
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == ReadinessStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_ready_and_recovers() {
        let r = Readiness::new();
        assert!(r.is_ready());
        r.mark_degraded();
        assert_eq!(r.status(), ReadinessStatus::Degraded);
        r.mark_ready();
        assert!(r.is_ready());
    }
}
