//! Lifecycle observers.
//!
//! A [`Supervisor`] is called synchronously by the runtime at fiber start,
//! end, suspension, resumption and on every reduction step. It only observes:
//! nothing it does changes how fibers are scheduled or how they end.
//!
//! Hooks run on worker threads, sometimes while the runtime's state lock is
//! not held but the fiber is mid-turn; they must be cheap and must not block
//! on the runtime they observe.

use crate::effect::node::NodeKind;
use crate::record::fiber::BlockingOn;
use crate::types::{DynExit, FiberId};
use std::sync::Arc;

/// Observer of fiber lifecycle events.
pub trait Supervisor: Send + Sync + 'static {
    /// A fiber was created. `parent` is `None` for root and daemon fibers.
    fn on_start(&self, fiber: FiberId, parent: Option<FiberId>) {
        let _ = (fiber, parent);
    }

    /// A fiber published its exit.
    fn on_end(&self, fiber: FiberId, exit: &DynExit) {
        let _ = (fiber, exit);
    }

    /// The interpreter is about to reduce a node.
    fn on_effect(&self, fiber: FiberId, kind: NodeKind) {
        let _ = (fiber, kind);
    }

    /// A fiber parked.
    fn on_suspend(&self, fiber: FiberId, on: BlockingOn) {
        let _ = (fiber, on);
    }

    /// A suspended fiber was resumed and starts its next turn. Fires once
    /// per [`on_suspend`](Supervisor::on_suspend), never for a fiber's first
    /// turn or a turn after a fair yield.
    fn on_resume(&self, fiber: FiberId) {
        let _ = fiber;
    }
}

/// Supervisor that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSupervisor;

impl Supervisor for NoopSupervisor {}

/// Broadcasts every event to each member, in insertion order.
#[derive(Clone, Default)]
pub struct CompositeSupervisor {
    members: Vec<Arc<dyn Supervisor>>,
}

impl CompositeSupervisor {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member.
    #[must_use]
    pub fn with(mut self, member: Arc<dyn Supervisor>) -> Self {
        self.members.push(member);
        self
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for CompositeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSupervisor")
            .field("members", &self.members.len())
            .finish()
    }
}

impl Supervisor for CompositeSupervisor {
    fn on_start(&self, fiber: FiberId, parent: Option<FiberId>) {
        for m in &self.members {
            m.on_start(fiber, parent);
        }
    }

    fn on_end(&self, fiber: FiberId, exit: &DynExit) {
        for m in &self.members {
            m.on_end(fiber, exit);
        }
    }

    fn on_effect(&self, fiber: FiberId, kind: NodeKind) {
        for m in &self.members {
            m.on_effect(fiber, kind);
        }
    }

    fn on_suspend(&self, fiber: FiberId, on: BlockingOn) {
        for m in &self.members {
            m.on_suspend(fiber, on);
        }
    }

    fn on_resume(&self, fiber: FiberId) {
        for m in &self.members {
            m.on_resume(fiber);
        }
    }
}

/// Builds the supervisor installed by `add_supervisor`: the current one
/// followed by `extra`.
pub(crate) fn compose(current: Arc<dyn Supervisor>, extra: Arc<dyn Supervisor>) -> Arc<dyn Supervisor> {
    Arc::new(CompositeSupervisor::new().with(current).with(extra))
}
