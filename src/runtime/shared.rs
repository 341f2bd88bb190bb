//! State shared by every worker of one runtime.
//!
//! [`RuntimeShared`] owns the state lock, the clock, the installed supervisor
//! and the work/done condition variables. Worker loops, the lab driver,
//! resumers handed to callbacks and fiber handles all reach the runtime
//! through it.

use super::config::DefectReporter;
use super::interpreter::RunOutcome;
use super::state::{Completion, JoinWait, RuntimeState};
use crate::effect::callback::Canceler;
use crate::effect::node::Node;
use crate::fiber_ref::FiberRefs;
use crate::record::fiber::{FiberLink, SuspendToken};
use crate::supervisor::{self, Supervisor};
use crate::time::TimeSource;
use crate::tracing_compat::{error, trace};
use crate::types::{Cause, Dynamic, FiberId, FiberRefId, Time};
use crate::util::DetRng;
use core::fmt;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// What a suspended fiber is resumed with.
#[derive(Debug)]
pub(crate) enum Resumption {
    Value(Dynamic),
    Failure(Cause<Dynamic>),
}

/// The single resumption closure stored for one suspension.
///
/// Holds the runtime weakly: a resumer that outlives its runtime is inert.
pub(crate) struct Resumer {
    shared: Weak<RuntimeShared>,
    token: SuspendToken,
}

impl Resumer {
    pub(crate) fn new(shared: &Arc<RuntimeShared>, token: SuspendToken) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            token,
        }
    }

    pub(crate) fn fiber_id(&self) -> FiberId {
        self.token.fiber
    }

    /// Returns `false` if the suspension was already consumed or the runtime
    /// is gone.
    pub(crate) fn resume(self, resumption: Resumption) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.resume(self.token, resumption),
            None => false,
        }
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("fiber", &self.token.fiber)
            .field("epoch", &self.token.epoch)
            .finish()
    }
}

/// Settings the core reads on every turn.
pub(crate) struct CoreConfig {
    pub(crate) step_budget: u32,
    pub(crate) defect_reporter: DefectReporter,
}

/// Runtime core shared between workers, handles and resumers.
pub(crate) struct RuntimeShared {
    state: Mutex<RuntimeState>,
    work: Condvar,
    done: Condvar,
    clock: Arc<dyn TimeSource>,
    supervisor: RwLock<Arc<dyn Supervisor>>,
    config: CoreConfig,
    next_ref_id: AtomicU64,
}

impl RuntimeShared {
    pub(crate) fn new(
        clock: Arc<dyn TimeSource>,
        supervisor: Arc<dyn Supervisor>,
        config: CoreConfig,
        rng: Option<DetRng>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RuntimeState::new(rng)),
            work: Condvar::new(),
            done: Condvar::new(),
            clock,
            supervisor: RwLock::new(supervisor),
            config,
            next_ref_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock()
    }

    pub(crate) fn now(&self) -> Time {
        self.clock.now()
    }

    pub(crate) fn step_budget(&self) -> u32 {
        self.config.step_budget
    }

    pub(crate) fn next_ref_id(&self) -> FiberRefId {
        FiberRefId(self.next_ref_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn supervisor(&self) -> Arc<dyn Supervisor> {
        self.supervisor.read().clone()
    }

    pub(crate) fn set_supervisor(&self, supervisor: Arc<dyn Supervisor>) {
        *self.supervisor.write() = supervisor;
    }

    pub(crate) fn add_supervisor(&self, extra: Arc<dyn Supervisor>) {
        let mut slot = self.supervisor.write();
        *slot = supervisor::compose(slot.clone(), extra);
    }

    /// Wakes one idle worker.
    pub(crate) fn notify_work(&self) {
        self.work.notify_one();
    }

    /// Wakes every idle worker, e.g. on shutdown.
    pub(crate) fn notify_all_work(&self) {
        self.work.notify_all();
    }

    /// Blocks the calling worker until notified or `timeout` elapses.
    pub(crate) fn wait_for_work(
        &self,
        guard: &mut MutexGuard<'_, RuntimeState>,
        timeout: Option<std::time::Duration>,
    ) {
        match timeout {
            Some(t) => {
                let _ = self.work.wait_for(guard, t);
            }
            None => self.work.wait(guard),
        }
    }

    /// Blocks until `link` has published its exit or `timeout` elapses.
    /// Returns whether the exit is available.
    pub(crate) fn wait_for_exit(&self, link: &FiberLink, timeout: Option<std::time::Duration>) -> bool {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut state = self.state.lock();
        while !link.is_done() {
            match deadline {
                Some(d) => {
                    if self.done.wait_until(&mut state, d).timed_out() {
                        return link.is_done();
                    }
                }
                None => self.done.wait(&mut state),
            }
        }
        true
    }

    /// Blocks until no fiber is registered or `timeout` elapses. Returns
    /// whether the runtime drained.
    pub(crate) fn wait_for_quiescence(&self, timeout: Option<std::time::Duration>) -> bool {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut state = self.state.lock();
        while state.live_fibers() > 0 {
            match deadline {
                Some(d) => {
                    if self.done.wait_until(&mut state, d).timed_out() {
                        return state.live_fibers() == 0;
                    }
                }
                None => self.done.wait(&mut state),
            }
        }
        true
    }

    /// Creates and schedules a fiber.
    pub(crate) fn spawn(
        &self,
        node: Arc<Node>,
        refs: FiberRefs,
        parent: Option<FiberId>,
        daemon: bool,
    ) -> FiberLink {
        let now = self.now();
        let (id, link) = self.lock().insert_fiber(node, refs, parent, daemon, now);
        self.supervisor().on_start(id, parent);
        trace!(fiber = %id, parent = ?parent, daemon, "fiber spawned");
        self.lock().schedule(id);
        self.notify_work();
        link
    }

    pub(crate) fn prepare_suspend(&self, id: FiberId, interruptible: bool) -> Option<SuspendToken> {
        self.lock().prepare_suspend(id, interruptible)
    }

    pub(crate) fn abandon_suspend(&self, token: SuspendToken) {
        self.lock().abandon_suspend(token);
    }

    pub(crate) fn suspend_on_timer(&self, id: FiberId, interruptible: bool, deadline: Time) {
        self.lock().suspend_on_timer(id, interruptible, deadline);
        // A worker waiting without a timeout must learn about the new deadline.
        self.notify_work();
    }

    pub(crate) fn suspend_on_join(&self, id: FiberId, interruptible: bool, target: &FiberLink) -> JoinWait {
        self.lock().suspend_on_join(id, interruptible, target)
    }

    pub(crate) fn resume(&self, token: SuspendToken, resumption: Resumption) -> bool {
        let resumed = self.lock().resume(token, resumption);
        if resumed {
            self.notify_work();
        }
        resumed
    }

    /// Requests interruption of `target`; runs the target's canceler, if any,
    /// after the state lock is released.
    pub(crate) fn request_interrupt(&self, target: FiberId, by: FiberId) {
        let canceler = self.lock().request_interrupt(target, by);
        self.notify_work();
        if let Some(canceler) = canceler {
            run_cancelers(vec![canceler]);
        }
    }

    /// Runs one turn of `id` and hands the interpreter back to the state.
    /// Returns `false` if the fiber could not be checked out.
    pub(crate) fn run_fiber(self: &Arc<Self>, id: FiberId) -> bool {
        let Some(mut run) = self.lock().checkout(id) else {
            return false;
        };
        let sup = self.supervisor();
        if run.take_resumed() {
            sup.on_resume(id);
        }
        let outcome = run.run(self, &*sup, self.config.step_budget);

        match outcome {
            RunOutcome::Yield => {
                self.lock().requeue(run);
                self.notify_work();
            }
            RunOutcome::Suspend { on, canceler } => {
                sup.on_suspend(id, on);
                let canceler = self.lock().park(run, on, canceler);
                self.notify_work();
                if let Some(canceler) = canceler {
                    run_cancelers(vec![canceler]);
                }
            }
            RunOutcome::BodyDone => {
                let cancelers = self.lock().begin_drain(run);
                self.notify_all_work();
                run_cancelers(cancelers);
            }
            RunOutcome::Done => {
                let completion = self.lock().complete(run);
                self.notify_all_work();
                match completion {
                    Completion::Parked(cancelers) => run_cancelers(cancelers),
                    Completion::Finished(finished) => {
                        self.done.notify_all();
                        sup.on_end(finished.id, &finished.exit);
                        if finished.unsupervised {
                            if let Some(cause) = finished.exit.cause() {
                                if cause.contains_defect() {
                                    (self.config.defect_reporter)(finished.id, cause);
                                }
                            }
                        }
                    }
                }
            }
        }
        true
    }

    /// Interrupts every parentless fiber on behalf of the runtime.
    pub(crate) fn interrupt_roots(&self) -> usize {
        let roots = self.lock().roots();
        for root in &roots {
            self.request_interrupt(*root, FiberId::RUNTIME);
        }
        roots.len()
    }

    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.clear_queues();
        drop(state);
        self.notify_all_work();
        self.done.notify_all();
    }
}

impl fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("step_budget", &self.config.step_budget)
            .finish_non_exhaustive()
    }
}

/// Runs cancelers outside the state lock. A panicking canceler is logged and
/// otherwise ignored.
fn run_cancelers(cancelers: Vec<Canceler>) {
    for canceler in cancelers {
        if panic::catch_unwind(AssertUnwindSafe(|| canceler.run())).is_err() {
            error!("canceler panicked");
        }
    }
}
