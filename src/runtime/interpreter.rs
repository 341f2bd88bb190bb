//! The trampoline that reduces a fiber's computation description.
//!
//! Each fiber owns a [`FiberRun`]: the current step, an explicit stack of
//! continuation frames, its interrupt-status stack, its scopes and its fiber
//! refs. [`FiberRun::run`] loops over a single `match` on the node being
//! reduced and never recurses on the host stack, however deep the description
//! or the continuation chain.
//!
//! A turn ends when the fiber
//! - exhausts its step budget ([`RunOutcome::Yield`]),
//! - parks on an external event ([`RunOutcome::Suspend`]),
//! - finishes its body ([`RunOutcome::BodyDone`]; children are drained before
//!   the root scope closes), or
//! - finishes closing its root scope ([`RunOutcome::Done`]).
//!
//! Interruption is checked before every node reduction while the fiber is
//! interruptible and still running its body. A value handed to the fiber by a
//! resumption is always delivered to the next frame first, so a permit or item
//! granted to a waiter reaches the code that releases it. Finalizers always
//! run with interruption disabled.

use super::shared::{Resumer, Resumption, RuntimeShared};
use super::state::JoinWait;
use crate::effect::callback::Canceler;
use crate::effect::node::{Cont, Finalizer, ForkMode, Node, Recover};
use crate::fiber_ref::FiberRefs;
use crate::record::fiber::{BlockingOn, FiberLink, InterruptSignal};
use crate::record::scope::Scope;
use crate::supervisor::Supervisor;
use crate::types::{value, Cause, DefectPayload, DynExit, Dynamic, Exit, FiberId, FiberRefId, Time};
use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What the trampoline does next.
pub(crate) enum Step {
    /// Reduce a node.
    Eval(Arc<Node>),
    /// Deliver a value to the top frame.
    Value(Dynamic),
    /// Deliver a failure to the top frame.
    Failure(Cause<Dynamic>),
}

impl Step {
    fn from_exit(exit: DynExit) -> Self {
        match exit {
            Exit::Success(v) => Self::Value(v),
            Exit::Failure(c) => Self::Failure(c),
        }
    }
}

enum Frame {
    OnSuccess(Cont),
    Fold { on_failure: Recover, on_success: Cont },
    PopInterruptStatus,
    CloseScope,
    OnExit(Finalizer),
    Finalizers {
        exit: DynExit,
        pending: Vec<Finalizer>,
        errors: Cause<Dynamic>,
    },
    InheritRefs(FiberLink),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Body,
    Draining,
    Closing,
    Finishing,
}

/// How a turn ended.
pub(crate) enum RunOutcome {
    Yield,
    Suspend {
        on: BlockingOn,
        canceler: Option<Canceler>,
    },
    BodyDone,
    Done,
}

enum Flow {
    Continue(Step),
    Yield(Step),
    Suspend(BlockingOn, Option<Canceler>),
}

/// Read-only view of the running fiber handed to
/// [`Node::WithContext`] functions.
pub(crate) struct FiberContext<'a> {
    fiber_id: FiberId,
    interruptible: bool,
    shared: &'a RuntimeShared,
}

impl FiberContext<'_> {
    pub(crate) fn fiber_id(&self) -> FiberId {
        self.fiber_id
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    pub(crate) fn now(&self) -> Time {
        self.shared.now()
    }

    pub(crate) fn next_ref_id(&self) -> FiberRefId {
        self.shared.next_ref_id()
    }
}

/// Per-fiber interpreter state.
pub(crate) struct FiberRun {
    id: FiberId,
    step: Option<Step>,
    stack: Vec<Frame>,
    /// Empty means interruptible.
    interrupt_status: Vec<bool>,
    /// `scopes[0]` is the fiber's own scope.
    scopes: Vec<Scope>,
    refs: FiberRefs,
    signal: Arc<InterruptSignal>,
    /// An interruption is unwinding the stack.
    interrupting: bool,
    phase: Phase,
    exit: Option<DynExit>,
    /// Resumed from a suspension since the last turn started.
    resumed: bool,
}

impl FiberRun {
    pub(crate) fn new(
        id: FiberId,
        root: Arc<Node>,
        refs: FiberRefs,
        signal: Arc<InterruptSignal>,
    ) -> Self {
        Self {
            id,
            step: Some(Step::Eval(root)),
            stack: Vec::new(),
            interrupt_status: Vec::new(),
            scopes: vec![Scope::new()],
            refs,
            signal,
            interrupting: false,
            phase: Phase::Body,
            exit: None,
            resumed: false,
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    fn is_interruptible(&self) -> bool {
        self.interrupt_status.last().copied().unwrap_or(true)
    }

    pub(crate) fn resume(&mut self, resumption: Resumption) {
        self.resumed = true;
        self.step = Some(match resumption {
            Resumption::Value(v) => Step::Value(v),
            Resumption::Failure(c) => Step::Failure(c),
        });
    }

    pub(crate) fn resume_interrupted(&mut self, by: FiberId) {
        self.resumed = true;
        self.interrupting = true;
        self.step = Some(Step::Failure(Cause::interrupt(by)));
    }

    /// True once per suspension that ended, at the start of the next turn.
    pub(crate) fn take_resumed(&mut self) -> bool {
        std::mem::take(&mut self.resumed)
    }

    pub(crate) fn take_exit(&mut self) -> DynExit {
        self.exit
            .take()
            .unwrap_or_else(|| Exit::defect("fiber finished without an exit"))
    }

    pub(crate) fn take_refs(&mut self) -> FiberRefs {
        std::mem::take(&mut self.refs)
    }

    #[cfg(test)]
    pub(crate) fn force_exit(&mut self, exit: DynExit) {
        self.exit = Some(exit);
        self.phase = Phase::Finishing;
    }

    /// Runs until the fiber yields, suspends or finishes a phase.
    pub(crate) fn run(
        &mut self,
        shared: &Arc<RuntimeShared>,
        sup: &dyn Supervisor,
        budget: u32,
    ) -> RunOutcome {
        match self.phase {
            Phase::Body | Phase::Closing => {}
            Phase::Draining => {
                self.phase = Phase::Closing;
                let exit = self.take_exit();
                let finalizers = self.scopes[0].begin_close();
                self.step = Some(self.begin_finalizers(exit, finalizers));
            }
            Phase::Finishing => return RunOutcome::Done,
        }

        let mut steps = 0_u32;
        loop {
            let Some(mut step) = self.step.take() else {
                return self.finish(Exit::defect("fiber resumed without a pending step"));
            };

            // Checkpoint before reducing a node only: a value or failure already
            // delivered to the fiber reaches its frames before interruption.
            if matches!(step, Step::Eval(_))
                && self.phase == Phase::Body
                && !self.interrupting
                && self.is_interruptible()
            {
                if let Some(by) = self.signal.requested_by() {
                    self.interrupting = true;
                    step = Step::Failure(Cause::interrupt(by));
                }
            }

            match step {
                Step::Eval(node) => {
                    if steps >= budget {
                        self.step = Some(Step::Eval(node));
                        return RunOutcome::Yield;
                    }
                    steps += 1;
                    sup.on_effect(self.id, node.kind());
                    match self.eval(node, shared) {
                        Flow::Continue(next) => self.step = Some(next),
                        Flow::Yield(next) => {
                            self.step = Some(next);
                            return RunOutcome::Yield;
                        }
                        Flow::Suspend(on, canceler) => return RunOutcome::Suspend { on, canceler },
                    }
                }
                Step::Value(v) => match self.stack.pop() {
                    Some(frame) => {
                        let next = self.on_value(frame, v);
                        self.step = Some(next);
                    }
                    None => return self.finish(Exit::Success(v)),
                },
                Step::Failure(c) => match self.stack.pop() {
                    Some(frame) => {
                        let next = self.on_failure(frame, c);
                        self.step = Some(next);
                    }
                    None => return self.finish(Exit::Failure(c)),
                },
            }
        }
    }

    fn finish(&mut self, exit: DynExit) -> RunOutcome {
        debug_assert!(self.stack.is_empty());
        self.exit = Some(exit);
        if self.phase == Phase::Body {
            self.phase = Phase::Draining;
            RunOutcome::BodyDone
        } else {
            if let Some(root) = self.scopes.first_mut() {
                root.finish_close();
            }
            self.phase = Phase::Finishing;
            RunOutcome::Done
        }
    }

    #[allow(clippy::too_many_lines)]
    fn eval(&mut self, node: Arc<Node>, shared: &Arc<RuntimeShared>) -> Flow {
        let step = match &*node {
            Node::Succeed(v) => Step::Value(v.clone()),
            Node::Fail(c) => Step::Failure(c.clone()),
            Node::Sync(thunk) => match panic::catch_unwind(AssertUnwindSafe(|| thunk())) {
                Ok(Ok(v)) => Step::Value(v),
                Ok(Err(c)) => Step::Failure(c),
                Err(panic) => Step::Failure(defect(&*panic)),
            },
            Node::Async(register) => {
                let Some(token) = shared.prepare_suspend(self.id, self.is_interruptible()) else {
                    return Flow::Continue(Step::Failure(Cause::defect("fiber is not registered")));
                };
                let resumer = Resumer::new(shared, token);
                match panic::catch_unwind(AssertUnwindSafe(|| register(resumer))) {
                    Ok(canceler) => return Flow::Suspend(BlockingOn::Async, canceler),
                    Err(panic) => {
                        shared.abandon_suspend(token);
                        Step::Failure(defect(&*panic))
                    }
                }
            }
            Node::FlatMap { first, next } => {
                self.stack.push(Frame::OnSuccess(next.clone()));
                Step::Eval(first.clone())
            }
            Node::Fold {
                first,
                on_failure,
                on_success,
            } => {
                self.stack.push(Frame::Fold {
                    on_failure: on_failure.clone(),
                    on_success: on_success.clone(),
                });
                Step::Eval(first.clone())
            }
            Node::Fork { child, mode } => {
                let (parent, daemon) = match *mode {
                    ForkMode::Child => (Some(self.id), false),
                    ForkMode::Daemon => (None, true),
                    ForkMode::In(owner) => (Some(owner), false),
                };
                let link = shared.spawn(child.clone(), self.refs.fork(), parent, daemon);
                Step::Value(value::erase(link))
            }
            Node::AddFinalizer(finalizer) => match self.scopes.last_mut() {
                Some(scope) => match scope.add(finalizer.clone()) {
                    Ok(()) => Step::Value(value::unit()),
                    Err(finalizer) => {
                        self.begin_finalizers(Exit::Success(value::unit()), vec![finalizer])
                    }
                },
                None => self.begin_finalizers(Exit::Success(value::unit()), vec![finalizer.clone()]),
            },
            Node::OnExit { body, finalizer } => {
                self.stack.push(Frame::OnExit(finalizer.clone()));
                Step::Eval(body.clone())
            }
            Node::Scoped(body) => {
                self.scopes.push(Scope::new());
                self.stack.push(Frame::CloseScope);
                Step::Eval(body.clone())
            }
            Node::SetInterruptible {
                body,
                interruptible,
            } => {
                self.interrupt_status.push(*interruptible);
                self.stack.push(Frame::PopInterruptStatus);
                Step::Eval(body.clone())
            }
            Node::WithContext(f) => {
                let ctx = FiberContext {
                    fiber_id: self.id,
                    interruptible: self.is_interruptible(),
                    shared,
                };
                Step::Eval(guarded(|| f(&ctx)))
            }
            Node::RefGet(def) => Step::Value(self.refs.get(def)),
            Node::RefUpdate { def, update } => {
                let current = self.refs.get(def);
                match panic::catch_unwind(AssertUnwindSafe(|| update(&current))) {
                    Ok((out, next)) => {
                        self.refs.set(def, next);
                        Step::Value(out)
                    }
                    Err(panic) => Step::Failure(defect(&*panic)),
                }
            }
            Node::Join { link, inherit_refs } => return self.join(link, *inherit_refs, shared),
            Node::Interrupt { link, wait } => {
                if link.id() == self.id {
                    self.signal.request(self.id);
                    Step::Value(value::erase(DynExit::interrupt(self.id)))
                } else {
                    shared.request_interrupt(link.id(), self.id);
                    if *wait {
                        return self.join(link, false, shared);
                    }
                    Step::Value(value::erase(DynExit::interrupt(self.id)))
                }
            }
            Node::Sleep(duration) => {
                if duration.is_zero() {
                    return Flow::Yield(Step::Value(value::unit()));
                }
                let deadline = shared.now() + *duration;
                shared.suspend_on_timer(self.id, self.is_interruptible(), deadline);
                return Flow::Suspend(BlockingOn::Sleep(deadline), None);
            }
            Node::Yield => return Flow::Yield(Step::Value(value::unit())),
        };
        Flow::Continue(step)
    }

    fn join(&mut self, link: &FiberLink, inherit_refs: bool, shared: &Arc<RuntimeShared>) -> Flow {
        if let Some(exit) = link.exit() {
            return Flow::Continue(self.joined(link, exit.clone(), inherit_refs));
        }
        match shared.suspend_on_join(self.id, self.is_interruptible(), link) {
            JoinWait::Ready => match link.exit() {
                Some(exit) => Flow::Continue(self.joined(link, exit.clone(), inherit_refs)),
                None => Flow::Continue(Step::Failure(Cause::defect("joined fiber has no exit"))),
            },
            JoinWait::Suspended => {
                if inherit_refs {
                    self.stack.push(Frame::InheritRefs(link.clone()));
                }
                Flow::Suspend(BlockingOn::Fiber(link.id()), None)
            }
            JoinWait::Unknown => Flow::Continue(Step::Failure(Cause::defect(format!(
                "fiber {} cannot be joined from {}",
                link.id(),
                self.id
            )))),
        }
    }

    fn joined(&mut self, link: &FiberLink, exit: DynExit, inherit_refs: bool) -> Step {
        if inherit_refs {
            if let Some(refs) = link.refs() {
                self.refs.join(refs);
            }
        }
        Step::Value(value::erase(exit))
    }

    fn on_value(&mut self, frame: Frame, v: Dynamic) -> Step {
        match frame {
            Frame::OnSuccess(k) | Frame::Fold { on_success: k, .. } => {
                Step::Eval(guarded(|| k(v)))
            }
            Frame::PopInterruptStatus => {
                self.interrupt_status.pop();
                Step::Value(v)
            }
            Frame::CloseScope => {
                let finalizers = self.close_top_scope();
                self.begin_finalizers(Exit::Success(v), finalizers)
            }
            Frame::OnExit(finalizer) => self.begin_finalizers(Exit::Success(v), vec![finalizer]),
            Frame::Finalizers {
                exit,
                pending,
                errors,
            } => self.continue_finalizers(exit, pending, errors),
            Frame::InheritRefs(link) => {
                if let Some(refs) = link.refs() {
                    self.refs.join(refs);
                }
                Step::Value(v)
            }
        }
    }

    fn on_failure(&mut self, frame: Frame, c: Cause<Dynamic>) -> Step {
        match frame {
            Frame::OnSuccess(_) | Frame::InheritRefs(_) => Step::Failure(c),
            Frame::Fold { on_failure, .. } => {
                if self.interrupting && self.is_interruptible() {
                    Step::Failure(c)
                } else {
                    // The checkpoint fires again at the next interruptible step.
                    self.interrupting = false;
                    Step::Eval(guarded(|| on_failure(c)))
                }
            }
            Frame::PopInterruptStatus => {
                self.interrupt_status.pop();
                Step::Failure(c)
            }
            Frame::CloseScope => {
                let finalizers = self.close_top_scope();
                self.begin_finalizers(Exit::Failure(c), finalizers)
            }
            Frame::OnExit(finalizer) => self.begin_finalizers(Exit::Failure(c), vec![finalizer]),
            Frame::Finalizers {
                exit,
                pending,
                errors,
            } => self.continue_finalizers(exit, pending, errors.then(c)),
        }
    }

    fn close_top_scope(&mut self) -> Vec<Finalizer> {
        match self.scopes.pop() {
            Some(mut scope) => {
                let finalizers = scope.begin_close();
                scope.finish_close();
                finalizers
            }
            None => Vec::new(),
        }
    }

    /// Runs `finalizers` LIFO with interruption disabled, then continues with
    /// `exit` followed by any finalizer failures.
    fn begin_finalizers(&mut self, exit: DynExit, finalizers: Vec<Finalizer>) -> Step {
        if finalizers.is_empty() {
            return Step::from_exit(exit);
        }
        self.interrupt_status.push(false);
        self.continue_finalizers(exit, finalizers, Cause::Empty)
    }

    fn continue_finalizers(
        &mut self,
        exit: DynExit,
        mut pending: Vec<Finalizer>,
        errors: Cause<Dynamic>,
    ) -> Step {
        match pending.pop() {
            Some(finalizer) => {
                let node = guarded(|| finalizer(&exit));
                self.stack.push(Frame::Finalizers {
                    exit,
                    pending,
                    errors,
                });
                Step::Eval(node)
            }
            None => {
                self.interrupt_status.pop();
                Step::from_exit(combine(exit, errors))
            }
        }
    }
}

impl fmt::Debug for FiberRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRun")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("frames", &self.stack.len())
            .field("scopes", &self.scopes.len())
            .field("interruptible", &self.is_interruptible())
            .field("interrupting", &self.interrupting)
            .finish_non_exhaustive()
    }
}

/// Sequences finalizer failures after the exit that triggered them.
fn combine(exit: DynExit, errors: Cause<Dynamic>) -> DynExit {
    if errors.is_empty() {
        return exit;
    }
    match exit {
        Exit::Success(_) => Exit::Failure(errors),
        Exit::Failure(c) => Exit::Failure(c.then(errors)),
    }
}

fn defect(panic: &(dyn std::any::Any + Send)) -> Cause<Dynamic> {
    Cause::Defect(DefectPayload::from_panic(panic))
}

/// Calls user code that builds the next node; a panic becomes a defect node.
fn guarded(f: impl FnOnce() -> Arc<Node>) -> Arc<Node> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Arc::new(Node::Fail(defect(&*panic))))
}
