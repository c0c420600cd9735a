use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::outcome::OutcomeStatus;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetricsSnapshot {
    pub invocations_total: u64,
    pub completed: u64,
    pub turn_budget_exceeded: u64,
    pub timed_out: u64,
    pub degraded: u64,
    pub failed: u64,
    pub acquisition_failures: u64,
    pub release_failures: u64,
    pub turns_observed: u64,
}

/// Orchestrator counters shared by concurrent invocations.
/// All counters are lock-free atomics; recording is O(1).
#[derive(Debug, Default)]
pub(crate) struct OrchestratorMetrics {
    invocations_total: AtomicU64,
    completed: AtomicU64,
    turn_budget_exceeded: AtomicU64,
    timed_out: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    acquisition_failures: AtomicU64,
    release_failures: AtomicU64,
    turns_observed: AtomicU64,
}

impl OrchestratorMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_acquisition_failure(&self) {
        self.invocations_total.fetch_add(1, Ordering::Relaxed);
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished invocation.
    pub(crate) fn record_outcome(
        &self,
        status: OutcomeStatus,
        turns: usize,
        release_failures: usize,
    ) {
        self.invocations_total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            OutcomeStatus::Completed => &self.completed,
            OutcomeStatus::TurnBudgetExceeded => &self.turn_budget_exceeded,
            OutcomeStatus::TimedOut => &self.timed_out,
            OutcomeStatus::Degraded => &self.degraded,
            OutcomeStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.turns_observed
            .fetch_add(turns as u64, Ordering::Relaxed);
        self.release_failures
            .fetch_add(release_failures as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> OrchestratorMetricsSnapshot {
        OrchestratorMetricsSnapshot {
            invocations_total: self.invocations_total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            turn_budget_exceeded: self.turn_budget_exceeded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            turns_observed: self.turns_observed.load(Ordering::Relaxed),
        }
    }
}
