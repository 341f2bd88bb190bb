//! Runtime state: the fiber arena, ready queue and timers.
//!
//! Every cross-fiber transition happens here, under the one state lock held by
//! [`RuntimeShared`](super::shared::RuntimeShared). Interpreter turns run
//! outside the lock; a fiber's [`FiberRun`] is checked out for the turn and
//! handed back through [`requeue`](RuntimeState::requeue),
//! [`park`](RuntimeState::park), [`begin_drain`](RuntimeState::begin_drain)
//! or [`complete`](RuntimeState::complete).
//!
//! Completion order for a fiber:
//! 1. body exit
//! 2. every live child is interrupted and awaited (`BlockingOn::Children`)
//! 3. the fiber's own scope is closed (on the fiber, uninterruptibly)
//! 4. the exit is published, joiners are resumed, the parent is detached and
//!    woken if it was draining

use super::interpreter::FiberRun;
use super::shared::Resumption;
use super::snapshot::{FiberSnapshot, RuntimeSnapshot, RuntimeStats};
use super::timer::TimerHeap;
use crate::effect::callback::Canceler;
use crate::effect::node::Node;
use crate::fiber_ref::FiberRefs;
use crate::record::fiber::{
    BlockingOn, FiberLink, FiberRecord, FiberStatus, InterruptSignal, SuspendToken,
};
use crate::runtime::scheduler::Scheduler;
use crate::tracing_compat::{debug, trace};
use crate::types::{value, DynExit, FiberId, Time};
use crate::util::{Arena, DetRng};
use smallvec::SmallVec;
use std::sync::Arc;

/// Result of trying to wait for another fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinWait {
    /// The target already published its exit.
    Ready,
    /// The caller is registered as a joiner.
    Suspended,
    /// The target is not a live fiber of this runtime.
    Unknown,
}

/// A fiber that published its exit during [`RuntimeState::complete`].
#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) id: FiberId,
    pub(crate) exit: DynExit,
    /// No parent supervised it (root, daemon or orphan).
    pub(crate) unsupervised: bool,
}

/// Outcome of handing a finished interpreter back.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Children appeared while the scope closed; the fiber waits for them.
    Parked(Vec<Canceler>),
    /// Exit published.
    Finished(Finished),
}

/// Mutable runtime state.
#[derive(Debug)]
pub(crate) struct RuntimeState {
    fibers: Arena<FiberRecord>,
    ready: Scheduler,
    timers: TimerHeap,
    rng: Option<DetRng>,
    stats: RuntimeStats,
    /// Workers exit once this is set.
    pub(crate) stopped: bool,
}

impl RuntimeState {
    pub(crate) fn new(rng: Option<DetRng>) -> Self {
        Self {
            fibers: Arena::new(),
            ready: Scheduler::new(),
            timers: TimerHeap::new(),
            rng,
            stats: RuntimeStats::default(),
            stopped: false,
        }
    }

    pub(crate) fn live_fibers(&self) -> usize {
        self.fibers.len()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn next_deadline(&self) -> Option<Time> {
        self.timers.peek_deadline()
    }

    pub(crate) fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub(crate) fn is_live(&self, id: FiberId) -> bool {
        self.fibers.contains(id.arena_index())
    }

    fn record_mut(&mut self, id: FiberId) -> Option<&mut FiberRecord> {
        self.fibers.get_mut(id.arena_index())
    }

    /// Creates a fiber without scheduling it.
    ///
    /// A child whose parent is already gone is created parentless and
    /// interrupted on behalf of that parent; a child of a fiber that is
    /// already waiting for its children is interrupted at once.
    pub(crate) fn insert_fiber(
        &mut self,
        node: Arc<Node>,
        refs: FiberRefs,
        parent: Option<FiberId>,
        daemon: bool,
        now: Time,
    ) -> (FiberId, FiberLink) {
        let signal = Arc::new(InterruptSignal::new());
        let index = self.fibers.insert_with(|index| {
            let id = FiberId::from_arena(index);
            let run = Box::new(FiberRun::new(id, node, refs, signal.clone()));
            FiberRecord::new(id, parent, now, daemon, run, signal.clone(), FiberLink::new(id))
        });
        let id = FiberId::from_arena(index);
        self.stats.spawned += 1;

        if let Some(parent_id) = parent {
            match self.record_mut(parent_id) {
                Some(parent) => {
                    parent.add_child(id);
                    if parent.draining {
                        signal.request(parent_id);
                    }
                }
                None => {
                    signal.request(parent_id);
                    if let Some(child) = self.record_mut(id) {
                        child.parent = None;
                    }
                    debug!(fiber = %id, parent = %parent_id, "fiber forked into a finished scope");
                }
            }
        }

        let link = self
            .fibers
            .get(index)
            .map_or_else(|| FiberLink::new(id), |r| r.link.clone());
        (id, link)
    }

    pub(crate) fn schedule(&mut self, id: FiberId) {
        let interrupted = match self.fibers.get(id.arena_index()) {
            Some(record) if record.run.is_some() => record.signal.is_requested(),
            _ => return,
        };
        if interrupted {
            self.ready.schedule_interrupt(id);
        } else {
            self.ready.schedule(id);
        }
    }

    pub(crate) fn pop_ready(&mut self) -> Option<FiberId> {
        match self.rng.as_mut() {
            Some(rng) => self.ready.pop_with(rng),
            None => self.ready.pop(),
        }
    }

    /// Takes a fiber's interpreter for one turn.
    pub(crate) fn checkout(&mut self, id: FiberId) -> Option<Box<FiberRun>> {
        let record = self.record_mut(id)?;
        let run = record.run.take()?;
        record.status = FiberStatus::Running;
        Some(run)
    }

    /// Returns a fiber that used up its turn to the ready queue.
    pub(crate) fn requeue(&mut self, run: Box<FiberRun>) {
        let id = run.id();
        if let Some(record) = self.record_mut(id) {
            record.run = Some(run);
            self.schedule(id);
        }
    }

    /// Starts a suspension of the running fiber.
    pub(crate) fn prepare_suspend(&mut self, id: FiberId, interruptible: bool) -> Option<SuspendToken> {
        Some(self.record_mut(id)?.begin_suspend(interruptible))
    }

    /// Withdraws a suspension whose registration failed.
    pub(crate) fn abandon_suspend(&mut self, token: SuspendToken) {
        if let Some(record) = self.record_mut(token.fiber) {
            record.claim(token.epoch);
            record.pending = None;
        }
    }

    pub(crate) fn suspend_on_timer(&mut self, id: FiberId, interruptible: bool, deadline: Time) {
        if let Some(token) = self.prepare_suspend(id, interruptible) {
            self.timers.insert(token, deadline);
        }
    }

    pub(crate) fn suspend_on_join(
        &mut self,
        id: FiberId,
        interruptible: bool,
        target: &FiberLink,
    ) -> JoinWait {
        if target.is_done() {
            return JoinWait::Ready;
        }
        if target.id() == id || !self.is_live(target.id()) {
            return JoinWait::Unknown;
        }
        let Some(token) = self.prepare_suspend(id, interruptible) else {
            return JoinWait::Unknown;
        };
        match self.record_mut(target.id()) {
            Some(record) => {
                record.joiners.push(token);
                JoinWait::Suspended
            }
            None => JoinWait::Unknown,
        }
    }

    /// Parks a fiber that returned from its turn suspended.
    ///
    /// A resumption that arrived during the turn wins. Otherwise an
    /// interruption requested during the turn resumes an interruptible wait
    /// at once, and the registration's canceler is returned to be run outside
    /// the lock.
    pub(crate) fn park(
        &mut self,
        mut run: Box<FiberRun>,
        on: BlockingOn,
        canceler: Option<Canceler>,
    ) -> Option<Canceler> {
        let id = run.id();
        let record = self.fibers.get_mut(id.arena_index())?;

        if let Some(resumption) = record.pending.take() {
            record.waiting = None;
            run.resume(resumption);
            record.run = Some(run);
            self.schedule(id);
            return None;
        }

        let interrupted_by = match record.waiting {
            Some(w) if w.interruptible => record.signal.requested_by(),
            _ => None,
        };
        if let Some(by) = interrupted_by {
            if let Some(w) = record.waiting.take() {
                self.timers.cancel(SuspendToken {
                    fiber: id,
                    epoch: w.epoch,
                });
            }
            run.resume_interrupted(by);
            record.run = Some(run);
            self.ready.schedule_interrupt(id);
            trace!(fiber = %id, by = %by, "suspension interrupted before parking");
            return canceler;
        }

        record.status = FiberStatus::Suspended(on);
        record.canceler = canceler;
        record.run = Some(run);
        None
    }

    /// Delivers a resumption. Rejects tokens whose suspension was already
    /// consumed.
    pub(crate) fn resume(&mut self, token: SuspendToken, resumption: Resumption) -> bool {
        let Some(record) = self.fibers.get_mut(token.fiber.arena_index()) else {
            self.stats.stale_resumptions += 1;
            return false;
        };
        if !record.claim(token.epoch) {
            self.stats.stale_resumptions += 1;
            return false;
        }
        match record.run.as_mut() {
            Some(run) => {
                run.resume(resumption);
                record.status = FiberStatus::Running;
                self.schedule(token.fiber);
            }
            None => record.pending = Some(resumption),
        }
        true
    }

    /// Requests interruption of `target` on behalf of `by`.
    ///
    /// An interruptibly suspended fiber is resumed with the interruption, its
    /// timer (if it was sleeping) cancelled and its canceler returned; otherwise the request waits for the fiber's next
    /// interruptible checkpoint.
    pub(crate) fn request_interrupt(&mut self, target: FiberId, by: FiberId) -> Option<Canceler> {
        let record = self.fibers.get_mut(target.arena_index())?;
        if record.signal.request(by) {
            self.stats.interrupts += 1;
            debug!(fiber = %target, by = %by, "interruption requested");
        }
        let by = record.signal.requested_by().unwrap_or(by);

        match (record.waiting, record.run.as_mut()) {
            (Some(w), Some(run)) if w.interruptible => {
                record.waiting = None;
                run.resume_interrupted(by);
                record.status = FiberStatus::Running;
                let canceler = record.canceler.take();
                self.timers.cancel(SuspendToken {
                    fiber: target,
                    epoch: w.epoch,
                });
                self.ready.schedule_interrupt(target);
                canceler
            }
            (None, Some(_)) if record.status == FiberStatus::Running => {
                self.ready.schedule_interrupt(target);
                None
            }
            _ => None,
        }
    }

    fn interrupt_children(&mut self, children: &[FiberId], by: FiberId) -> Vec<Canceler> {
        children
            .iter()
            .filter_map(|child| self.request_interrupt(*child, by))
            .collect()
    }

    /// Parks a fiber whose body finished until its children are done.
    pub(crate) fn begin_drain(&mut self, run: Box<FiberRun>) -> Vec<Canceler> {
        let id = run.id();
        let Some(record) = self.record_mut(id) else {
            return Vec::new();
        };
        record.run = Some(run);
        if !record.has_children() {
            self.schedule(id);
            return Vec::new();
        }
        record.draining = true;
        record.status = FiberStatus::Suspended(BlockingOn::Children);
        let children: SmallVec<[FiberId; 4]> = record.children.clone();
        trace!(fiber = %id, children = children.len(), "draining children");
        self.interrupt_children(&children, id)
    }

    /// Publishes a finished fiber's exit, unless children were forked while
    /// its scope closed, in which case those are interrupted and awaited first.
    pub(crate) fn complete(&mut self, mut run: Box<FiberRun>) -> Completion {
        let id = run.id();
        let Some(record) = self.record_mut(id) else {
            return Completion::Parked(Vec::new());
        };
        if record.has_children() {
            record.run = Some(run);
            record.draining = true;
            record.status = FiberStatus::Suspended(BlockingOn::Children);
            let children: SmallVec<[FiberId; 4]> = record.children.clone();
            return Completion::Parked(self.interrupt_children(&children, id));
        }

        let Some(mut record) = self.fibers.remove(id.arena_index()) else {
            return Completion::Parked(Vec::new());
        };
        self.ready.remove(id);
        let exit = run.take_exit();
        record.link.publish(run.take_refs(), exit.clone());
        record.status = FiberStatus::Done;
        self.stats.completed += 1;

        if let Some(parent_id) = record.parent {
            if let Some(parent) = self.record_mut(parent_id) {
                parent.remove_child(id);
                if parent.draining && !parent.has_children() {
                    parent.draining = false;
                    self.schedule(parent_id);
                }
            }
        }

        let joiners = std::mem::take(&mut record.joiners);
        for token in joiners {
            self.resume(token, Resumption::Value(value::erase(exit.clone())));
        }

        debug!(fiber = %id, success = exit.is_success(), "fiber done");
        Completion::Finished(Finished {
            id,
            exit,
            unsupervised: record.parent.is_none(),
        })
    }

    /// Resumes every sleeper whose deadline has passed.
    pub(crate) fn fire_timers(&mut self, now: Time) -> usize {
        let mut fired = 0;
        for token in self.timers.pop_expired(now) {
            if self.resume(token, Resumption::Value(value::unit())) {
                fired += 1;
            }
        }
        fired
    }

    /// Ids of fibers with no parent.
    pub(crate) fn roots(&self) -> Vec<FiberId> {
        self.fibers
            .iter()
            .filter(|(_, r)| r.parent.is_none())
            .map(|(_, r)| r.id)
            .collect()
    }

    pub(crate) fn clear_queues(&mut self) {
        self.ready.clear();
        self.timers.clear();
    }

    pub(crate) fn snapshot(&self, now: Time) -> RuntimeSnapshot {
        let mut fibers: Vec<FiberSnapshot> = self
            .fibers
            .iter()
            .map(|(_, r)| FiberSnapshot::from_record(r))
            .collect();
        fibers.sort_by_key(|f| f.id);
        RuntimeSnapshot {
            timestamp: now,
            fibers,
            ready: self.ready.len(),
            timers: self.timers.len(),
            stats: self.stats,
        }
    }

    /// Structural checks over the fiber graph. Returns one message per
    /// violation.
    pub(crate) fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for (_, record) in self.fibers.iter() {
            if record.status.is_done() {
                violations.push(format!("fiber {} is done but still registered", record.id));
            }
            if let Some(parent_id) = record.parent {
                match self.fibers.get(parent_id.arena_index()) {
                    None => violations.push(format!(
                        "fiber {} outlived its parent {}",
                        record.id, parent_id
                    )),
                    Some(parent) if !parent.children.contains(&record.id) => violations.push(
                        format!("fiber {} is missing from its parent's children", record.id),
                    ),
                    Some(_) => {}
                }
            }
            for child in &record.children {
                match self.fibers.get(child.arena_index()) {
                    Some(c) if c.parent == Some(record.id) => {}
                    _ => violations.push(format!(
                        "fiber {} lists {} as a child but does not supervise it",
                        record.id, child
                    )),
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exit;

    fn node() -> Arc<Node> {
        Arc::new(Node::Succeed(value::unit()))
    }

    fn spawn(state: &mut RuntimeState, parent: Option<FiberId>) -> FiberId {
        let (id, _) = state.insert_fiber(node(), FiberRefs::default(), parent, false, Time::ZERO);
        id
    }

    #[test]
    fn child_is_registered_with_parent() {
        let mut state = RuntimeState::new(None);
        let parent = spawn(&mut state, None);
        let child = spawn(&mut state, Some(parent));
        let snap = state.snapshot(Time::ZERO);
        assert_eq!(snap.fiber(parent).map(|f| f.children.clone()), Some(vec![child]));
        assert_eq!(snap.fiber(child).and_then(|f| f.parent), Some(parent));
        assert!(state.check_invariants().is_empty());
    }

    #[test]
    fn fork_into_finished_scope_interrupts_child() {
        let mut state = RuntimeState::new(None);
        let gone = FiberId::new_for_test(40, 3);
        let child = spawn(&mut state, Some(gone));
        let snap = state.snapshot(Time::ZERO);
        let record = snap.fiber(child);
        assert_eq!(record.map(|f| f.parent), Some(None));
        assert_eq!(record.map(|f| f.interrupt_requested), Some(true));
    }

    #[test]
    fn stale_resumption_is_rejected() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let run = state.checkout(id);
        assert!(run.is_some());
        let token = state.prepare_suspend(id, true);
        let Some(token) = token else {
            panic!("live fiber must accept a suspension");
        };
        assert!(state.resume(token, Resumption::Value(value::unit())));
        assert!(!state.resume(token, Resumption::Value(value::unit())));
        assert_eq!(state.stats().stale_resumptions, 1);
    }

    #[test]
    fn resumption_during_turn_is_kept_pending() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let Some(run) = state.checkout(id) else {
            panic!("fiber must be parked after insert");
        };
        let Some(token) = state.prepare_suspend(id, true) else {
            panic!("live fiber must accept a suspension");
        };
        assert!(state.resume(token, Resumption::Value(value::erase(5_u8))));
        assert!(state.park(run, BlockingOn::Async, None).is_none());
        assert_eq!(state.pop_ready(), Some(id));
    }

    #[test]
    fn interrupt_resumes_interruptible_wait_and_returns_canceler() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let Some(run) = state.checkout(id) else {
            panic!("fiber must be parked after insert");
        };
        let _ = state.prepare_suspend(id, true);
        let parked = state.park(run, BlockingOn::Async, Some(Canceler::new(|| {})));
        assert!(parked.is_none());

        let canceler = state.request_interrupt(id, FiberId::RUNTIME);
        assert!(canceler.is_some());
        assert_eq!(state.pop_ready(), Some(id));
        assert_eq!(state.stats().interrupts, 1);
    }

    #[test]
    fn uninterruptible_wait_ignores_interrupt() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let Some(run) = state.checkout(id) else {
            panic!("fiber must be parked after insert");
        };
        let _ = state.prepare_suspend(id, false);
        let _ = state.park(run, BlockingOn::Async, None);
        assert!(state.request_interrupt(id, FiberId::RUNTIME).is_none());
        assert!(!state.has_ready());
    }

    #[test]
    fn completion_detaches_from_parent_and_wakes_it() {
        let mut state = RuntimeState::new(None);
        let parent = spawn(&mut state, None);
        let child = spawn(&mut state, Some(parent));

        let Some(parent_run) = state.checkout(parent) else {
            panic!("parent must be parked");
        };
        let cancelers = state.begin_drain(parent_run);
        assert!(cancelers.is_empty());
        assert!(state.snapshot(Time::ZERO).fiber(child).is_some_and(|f| f.interrupt_requested));

        let Some(mut child_run) = state.checkout(child) else {
            panic!("child must be parked");
        };
        child_run.force_exit(Exit::<(), ()>::interrupt(parent).erase());
        match state.complete(child_run) {
            Completion::Finished(f) => {
                assert_eq!(f.id, child);
                assert!(f.exit.is_interrupted());
                assert!(!f.unsupervised);
            }
            Completion::Parked(_) => panic!("child has no children of its own"),
        }
        assert_eq!(state.pop_ready(), Some(parent));
        assert!(state.check_invariants().is_empty());
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let mut state = RuntimeState::new(None);
        let a = spawn(&mut state, None);
        let b = spawn(&mut state, None);
        for (id, ms) in [(a, 20), (b, 10)] {
            let Some(run) = state.checkout(id) else {
                panic!("fiber must be parked");
            };
            state.suspend_on_timer(id, true, Time::from_millis(ms));
            let _ = state.park(run, BlockingOn::Sleep(Time::from_millis(ms)), None);
        }
        assert_eq!(state.next_deadline(), Some(Time::from_millis(10)));
        assert_eq!(state.fire_timers(Time::from_millis(15)), 1);
        assert_eq!(state.pop_ready(), Some(b));
        assert_eq!(state.fire_timers(Time::from_millis(20)), 1);
        assert_eq!(state.pop_ready(), Some(a));
    }

    #[test]
    fn interrupted_sleep_cancels_its_timer() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let Some(run) = state.checkout(id) else {
            panic!("fiber must be parked");
        };
        let deadline = Time::from_secs(3600);
        state.suspend_on_timer(id, true, deadline);
        let _ = state.park(run, BlockingOn::Sleep(deadline), None);
        assert_eq!(state.next_deadline(), Some(deadline));

        let _ = state.request_interrupt(id, FiberId::RUNTIME);
        assert_eq!(state.next_deadline(), None);
        assert_eq!(state.snapshot(Time::ZERO).timers, 0);
    }

    #[test]
    fn sleep_interrupted_during_its_turn_cancels_its_timer() {
        let mut state = RuntimeState::new(None);
        let id = spawn(&mut state, None);
        let Some(run) = state.checkout(id) else {
            panic!("fiber must be parked");
        };
        let deadline = Time::from_secs(5);
        state.suspend_on_timer(id, true, deadline);
        let _ = state.request_interrupt(id, FiberId::RUNTIME);
        let _ = state.park(run, BlockingOn::Sleep(deadline), None);
        assert_eq!(state.next_deadline(), None);
        assert_eq!(state.pop_ready(), Some(id));
    }
}
