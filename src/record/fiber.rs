//! Fiber record for the runtime.
//!
//! A fiber is the unit of scheduling, interruption and supervision. The record
//! holds what the runtime needs to track a fiber between turns; the
//! interpreter state itself is parked in [`FiberRecord::run`] while the fiber
//! is not on a worker.

use crate::effect::callback::Canceler;
use crate::fiber_ref::FiberRefs;
use crate::runtime::interpreter::FiberRun;
use crate::runtime::shared::Resumption;
use crate::types::{DynExit, FiberId, Time};
use core::fmt;
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// What a suspended fiber is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockingOn {
    /// An external callback.
    Async,
    /// The exit of another fiber.
    Fiber(FiberId),
    /// A timer with the given deadline.
    Sleep(Time),
    /// Its own children, after its body finished.
    Children,
}

/// Lifecycle status of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FiberStatus {
    /// Ready or on a worker.
    Running,
    /// Parked until a resumption arrives.
    Suspended(BlockingOn),
    /// Exit published.
    Done,
}

impl FiberStatus {
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Interruption request flag shared between a fiber's record and its
/// interpreter.
///
/// The first requester wins; later requests are ignored.
#[derive(Debug, Default)]
pub(crate) struct InterruptSignal {
    requested: AtomicBool,
    by: Mutex<Option<FiberId>>,
}

impl InterruptSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call recorded the request.
    pub(crate) fn request(&self, by: FiberId) -> bool {
        let mut slot = self.by.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(by);
        self.requested.store(true, Ordering::Release);
        true
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn requested_by(&self) -> Option<FiberId> {
        if self.is_requested() {
            *self.by.lock()
        } else {
            None
        }
    }
}

/// Published result of a fiber: written once at completion, read by any
/// number of handles.
#[derive(Debug, Default)]
pub(crate) struct ExitCell {
    exit: OnceLock<DynExit>,
    refs: OnceLock<FiberRefs>,
}

/// Shared, cheap handle onto a fiber's eventual exit.
#[derive(Clone)]
pub(crate) struct FiberLink {
    id: FiberId,
    cell: Arc<ExitCell>,
}

impl FiberLink {
    pub(crate) fn new(id: FiberId) -> Self {
        Self {
            id,
            cell: Arc::new(ExitCell::default()),
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn exit(&self) -> Option<&DynExit> {
        self.cell.exit.get()
    }

    pub(crate) fn refs(&self) -> Option<&FiberRefs> {
        self.cell.refs.get()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.cell.exit.get().is_some()
    }

    /// Publishes the final refs and exit. Refs are written first so anyone
    /// who observes the exit also observes them.
    pub(crate) fn publish(&self, refs: FiberRefs, exit: DynExit) -> bool {
        let _ = self.cell.refs.set(refs);
        self.cell.exit.set(exit).is_ok()
    }
}

impl fmt::Debug for FiberLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberLink")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Identifies one suspension of one fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SuspendToken {
    pub(crate) fiber: FiberId,
    pub(crate) epoch: u64,
}

/// The current suspension, while it can still be resumed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiting {
    pub(crate) epoch: u64,
    pub(crate) interruptible: bool,
}

/// Internal record of a live fiber.
pub(crate) struct FiberRecord {
    pub(crate) id: FiberId,
    pub(crate) parent: Option<FiberId>,
    pub(crate) created_at: Time,
    pub(crate) daemon: bool,
    pub(crate) status: FiberStatus,
    pub(crate) children: SmallVec<[FiberId; 4]>,
    /// Parked interpreter state; `None` while a worker holds it.
    pub(crate) run: Option<Box<FiberRun>>,
    pub(crate) signal: Arc<InterruptSignal>,
    pub(crate) link: FiberLink,
    pub(crate) epoch: u64,
    pub(crate) waiting: Option<Waiting>,
    /// Resumption that arrived while the interpreter was checked out.
    pub(crate) pending: Option<Resumption>,
    pub(crate) canceler: Option<Canceler>,
    pub(crate) joiners: Vec<SuspendToken>,
    /// Body finished; waiting for children before closing its scope.
    pub(crate) draining: bool,
}

impl FiberRecord {
    pub(crate) fn new(
        id: FiberId,
        parent: Option<FiberId>,
        created_at: Time,
        daemon: bool,
        run: Box<FiberRun>,
        signal: Arc<InterruptSignal>,
        link: FiberLink,
    ) -> Self {
        Self {
            id,
            parent,
            created_at,
            daemon,
            status: FiberStatus::Running,
            children: SmallVec::new(),
            run: Some(run),
            signal,
            link,
            epoch: 0,
            waiting: None,
            pending: None,
            canceler: None,
            joiners: Vec::new(),
            draining: false,
        }
    }

    pub(crate) fn add_child(&mut self, child: FiberId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: FiberId) -> bool {
        if let Some(pos) = self.children.iter().position(|c| *c == child) {
            self.children.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub(crate) fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Starts a new suspension and returns its token.
    pub(crate) fn begin_suspend(&mut self, interruptible: bool) -> SuspendToken {
        self.epoch += 1;
        self.waiting = Some(Waiting {
            epoch: self.epoch,
            interruptible,
        });
        SuspendToken {
            fiber: self.id,
            epoch: self.epoch,
        }
    }

    /// Consumes the current suspension if `epoch` still names it.
    pub(crate) fn claim(&mut self, epoch: u64) -> bool {
        match self.waiting {
            Some(w) if w.epoch == epoch => {
                self.waiting = None;
                self.canceler = None;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for FiberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("status", &self.status)
            .field("children", &self.children)
            .field("daemon", &self.daemon)
            .field("epoch", &self.epoch)
            .field("draining", &self.draining)
            .finish_non_exhaustive()
    }
}
