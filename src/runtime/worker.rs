//! Worker thread logic.

use super::shared::RuntimeShared;
use crate::tracing_compat::{debug, trace};
use crate::types::FiberId;
use std::sync::Arc;
use std::time::Duration;

/// Identifier for a worker thread.
pub type WorkerId = usize;

/// Longest a worker sleeps while a timer is pending. Bounds the drift when
/// the clock is not the wall clock.
const MAX_TIMER_PARK: Duration = Duration::from_millis(50);

/// A worker thread that runs fibers from the shared ready queue.
#[derive(Debug)]
pub(crate) struct Worker {
    id: WorkerId,
    shared: Arc<RuntimeShared>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, shared: Arc<RuntimeShared>) -> Self {
        Self { id, shared }
    }

    /// Runs the worker scheduling loop until the runtime stops.
    pub(crate) fn run_loop(&self) {
        debug!(worker_id = self.id, "worker started");
        while let Some(fiber) = self.next_fiber() {
            trace!(fiber = %fiber, worker_id = self.id, "running fiber");
            self.shared.run_fiber(fiber);
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    /// Blocks until a fiber is ready. Returns `None` once the runtime stops.
    fn next_fiber(&self) -> Option<FiberId> {
        let mut state = self.shared.lock();
        loop {
            if state.stopped {
                return None;
            }
            let now = self.shared.now();
            if state.fire_timers(now) > 1 {
                self.shared.notify_all_work();
            }
            if let Some(id) = state.pop_ready() {
                return Some(id);
            }
            let park = state
                .next_deadline()
                .map(|deadline| deadline.duration_since(now).min(MAX_TIMER_PARK));
            self.shared.wait_for_work(&mut state, park);
        }
    }
}
