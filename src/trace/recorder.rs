//! Supervisor that records fiber lifecycle events into a trace buffer.

use super::buffer::TraceBufferHandle;
use super::event::TraceEvent;
use crate::effect::NodeKind;
use crate::record::BlockingOn;
use crate::supervisor::Supervisor;
use crate::time::TimeSource;
use crate::types::{DynExit, FiberId};
use core::fmt;
use std::sync::Arc;

/// Records every supervisor event as a [`TraceEvent`].
///
/// Effect events are frequent; they are only recorded when enabled with
/// [`with_effects`](Self::with_effects).
#[derive(Clone)]
pub struct TraceSupervisor {
    buffer: TraceBufferHandle,
    clock: Arc<dyn TimeSource>,
    effects: bool,
}

impl TraceSupervisor {
    /// Creates a recorder with a ring of `capacity` events, timestamped by
    /// `clock`.
    #[must_use]
    pub fn new(capacity: usize, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            buffer: TraceBufferHandle::new(capacity),
            clock,
            effects: false,
        }
    }

    /// Also records one event per reduced node.
    #[must_use]
    pub fn with_effects(mut self, enabled: bool) -> Self {
        self.effects = enabled;
        self
    }

    /// The shared buffer events are recorded into.
    #[must_use]
    pub fn buffer(&self) -> &TraceBufferHandle {
        &self.buffer
    }

    /// The recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.buffer.snapshot()
    }

    fn record(&self, make: impl FnOnce(u64, crate::types::Time) -> TraceEvent) {
        let seq = self.buffer.next_seq();
        self.buffer.push_event(make(seq, self.clock.now()));
    }
}

impl fmt::Debug for TraceSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSupervisor")
            .field("events", &self.buffer.len())
            .field("effects", &self.effects)
            .finish()
    }
}

impl Supervisor for TraceSupervisor {
    fn on_start(&self, fiber: FiberId, parent: Option<FiberId>) {
        self.record(|seq, now| TraceEvent::start(seq, now, fiber, parent));
    }

    fn on_end(&self, fiber: FiberId, exit: &DynExit) {
        self.record(|seq, now| TraceEvent::end(seq, now, fiber, exit));
    }

    fn on_effect(&self, fiber: FiberId, kind: NodeKind) {
        if self.effects {
            self.record(|seq, now| TraceEvent::effect(seq, now, fiber, kind));
        }
    }

    fn on_suspend(&self, fiber: FiberId, on: BlockingOn) {
        self.record(|seq, now| TraceEvent::suspend(seq, now, fiber, on));
    }

    fn on_resume(&self, fiber: FiberId) {
        self.record(|seq, now| TraceEvent::resume(seq, now, fiber));
    }
}
