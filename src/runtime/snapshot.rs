//! Serializable view of a runtime for debugging and visualization.

use crate::record::fiber::{FiberRecord, FiberStatus};
use crate::types::{FiberId, Time};
use serde::Serialize;

/// Point-in-time view of every live fiber.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    /// Snapshot timestamp.
    pub timestamp: Time,
    /// Live fibers, ordered by id.
    pub fibers: Vec<FiberSnapshot>,
    /// Fibers waiting in the ready queue.
    pub ready: usize,
    /// Pending timers of sleeping fibers.
    pub timers: usize,
    /// Lifetime counters.
    pub stats: RuntimeStats,
}

impl RuntimeSnapshot {
    /// Renders the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Looks up a fiber by id.
    #[must_use]
    pub fn fiber(&self, id: FiberId) -> Option<&FiberSnapshot> {
        self.fibers.iter().find(|f| f.id == id)
    }
}

/// One fiber in a [`RuntimeSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct FiberSnapshot {
    /// Fiber identifier.
    pub id: FiberId,
    /// Supervising parent, if any.
    pub parent: Option<FiberId>,
    /// Lifecycle status.
    pub status: FiberStatus,
    /// Live children.
    pub children: Vec<FiberId>,
    /// Forked without a parent.
    pub daemon: bool,
    /// Creation time.
    pub created_at: Time,
    /// An interruption has been requested.
    pub interrupt_requested: bool,
}

impl FiberSnapshot {
    pub(crate) fn from_record(record: &FiberRecord) -> Self {
        Self {
            id: record.id,
            parent: record.parent,
            status: record.status,
            children: record.children.to_vec(),
            daemon: record.daemon,
            created_at: record.created_at,
            interrupt_requested: record.signal.is_requested(),
        }
    }
}

/// Lifetime counters of a runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Fibers created.
    pub spawned: u64,
    /// Fibers that published an exit.
    pub completed: u64,
    /// Interruption requests delivered to a live fiber.
    pub interrupts: u64,
    /// Resumptions rejected because their suspension was already consumed.
    pub stale_resumptions: u64,
}
