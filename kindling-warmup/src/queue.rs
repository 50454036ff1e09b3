//! Work queue for scheduled conversation units.

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;

use crate::unit::{ScheduledUnit, UnitId};

/// Why a unit stopped before finishing its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The campaign's daily send cap was already reached.
    CapReached,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapReached => write!(f, "daily cap reached"),
        }
    }
}

/// Lifecycle of a unit in the queue. `Aborted` is observable and
/// distinct from `Done`: a finished script and a cap stop are
/// different facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Pending,
    InFlight,
    Done,
    Aborted(AbortReason),
}

/// A unit plus its scheduling state.
#[derive(Debug, Clone)]
pub struct UnitEntry {
    pub unit: ScheduledUnit,
    pub status: UnitStatus,
    pub next_step_at: SystemTime,
}

/// Manages pending conversation units (lock-free concurrent access).
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    queue: Arc<DashMap<UnitId, UnitEntry>>,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit, due at `next_step_at`.
    pub fn enqueue(&self, unit: ScheduledUnit, next_step_at: SystemTime) {
        self.queue.insert(
            unit.id,
            UnitEntry {
                unit,
                status: UnitStatus::Pending,
                next_step_at,
            },
        );
    }

    /// Take every pending unit whose due time has passed, marking each
    /// `InFlight`. The returned clones are the caller's to advance;
    /// state flows back through `reschedule`/`complete`/`abort`.
    #[must_use]
    pub fn due_units(&self, now: SystemTime) -> Vec<ScheduledUnit> {
        let mut due = Vec::new();
        for mut entry in self.queue.iter_mut() {
            if entry.status == UnitStatus::Pending && entry.next_step_at <= now {
                entry.status = UnitStatus::InFlight;
                due.push(entry.unit.clone());
            }
        }
        due
    }

    /// Put an advanced unit back, pending again at `next_step_at`.
    pub fn reschedule(&self, unit: ScheduledUnit, next_step_at: SystemTime) {
        self.queue.insert(
            unit.id,
            UnitEntry {
                unit,
                status: UnitStatus::Pending,
                next_step_at,
            },
        );
    }

    /// Mark a unit's script fully played.
    pub fn complete(&self, id: UnitId) {
        if let Some(mut entry) = self.queue.get_mut(&id) {
            entry.status = UnitStatus::Done;
        }
    }

    /// Stop a unit before its script finished.
    pub fn abort(&self, id: UnitId, reason: AbortReason) {
        if let Some(mut entry) = self.queue.get_mut(&id) {
            entry.status = UnitStatus::Aborted(reason);
        }
    }

    /// Flip every `InFlight` entry back to `Pending`, due again at
    /// `next_step_at`. Called after a processing pass has joined all
    /// its tasks: anything still in flight belongs to a task that died
    /// without reporting back. Returns how many entries were recovered.
    pub fn reschedule_in_flight(&self, next_step_at: SystemTime) -> usize {
        let mut recovered = 0;
        for mut entry in self.queue.iter_mut() {
            if entry.status == UnitStatus::InFlight {
                entry.status = UnitStatus::Pending;
                entry.next_step_at = next_step_at;
                recovered += 1;
            }
        }
        recovered
    }

    #[must_use]
    pub fn status(&self, id: UnitId) -> Option<UnitStatus> {
        self.queue.get(&id).map(|entry| entry.status)
    }

    /// Snapshot of every entry, for introspection and tests.
    #[must_use]
    pub fn all_entries(&self) -> Vec<UnitEntry> {
        self.queue
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of units not yet done or aborted.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.queue
            .iter()
            .filter(|entry| {
                matches!(entry.status, UnitStatus::Pending | UnitStatus::InFlight)
            })
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop finished and aborted entries.
    pub fn prune(&self) {
        self.queue
            .retain(|_, entry| matches!(entry.status, UnitStatus::Pending | UnitStatus::InFlight));
    }
}
