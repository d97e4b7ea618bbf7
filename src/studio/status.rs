//! Read-only projection of the orchestrator's run state for pollers.

use std::sync::{Arc, Mutex, MutexGuard};

use super::models::{JobRecord, RunState, RunStatus, RunStatusSnapshot};

/// Shared slot holding the current (or most recent) run.
pub(crate) type RunSlot = Arc<Mutex<Option<RunState>>>;

/// Lock the run slot. A panicking run task can poison the lock; the state
/// behind it is still consistent per record, so readers recover it.
pub(crate) fn lock_slot(slot: &RunSlot) -> MutexGuard<'_, Option<RunState>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hands out copies of run state; never a live reference.
#[derive(Clone)]
pub struct StatusReporter {
    slot: RunSlot,
    recent: usize,
}

impl StatusReporter {
    pub(crate) fn new(slot: RunSlot, recent: usize) -> Self {
        Self { slot, recent }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        match lock_slot(&self.slot).as_ref() {
            Some(run) => run.snapshot(self.recent),
            None => RunStatusSnapshot::idle(),
        }
    }

    pub fn status(&self) -> RunStatus {
        lock_slot(&self.slot)
            .as_ref()
            .map(|run| run.status)
            .unwrap_or(RunStatus::Idle)
    }

    /// Every record of the current run, in prompt order.
    pub fn records(&self) -> Vec<JobRecord> {
        lock_slot(&self.slot)
            .as_ref()
            .map(|run| run.records.clone())
            .unwrap_or_default()
    }

    pub fn record(&self, index: usize) -> Option<JobRecord> {
        lock_slot(&self.slot)
            .as_ref()
            .and_then(|run| run.records.get(index).cloned())
    }
}
