//! Typed computation descriptions.
//!
//! An [`Effect<A, E>`] describes a computation that succeeds with an `A`,
//! fails with a [`Cause<E>`], or is interrupted. Building an effect does
//! nothing; a runtime reduces it on a fiber. The same effect may be run any
//! number of times.
//!
//! ```
//! use fibra::{Effect, LabRuntime};
//!
//! let program = Effect::<u32, String>::succeed(20)
//!     .map(|n| n + 1)
//!     .flat_map(|n| Effect::succeed(n * 2));
//!
//! let mut lab = LabRuntime::new(Default::default());
//! let exit = lab.block_on(program).expect("lab made progress");
//! assert_eq!(exit.unwrap(), 42);
//! ```
//!
//! # Panics in user code
//!
//! A closure passed to any constructor or operator that panics while the
//! interpreter calls it ends the computation with a [`Cause::Defect`]
//! carrying the panic message.

pub mod callback;
pub(crate) mod node;

pub use callback::{Callback, Canceler};
pub use node::NodeKind;

use crate::record::fiber::FiberLink;
use crate::runtime::fiber_handle::FiberHandle;
use crate::runtime::interpreter::FiberContext;
use crate::types::exit::{downcast_cause, erase_cause};
use crate::types::{value, Cause, Data, DynExit, Dynamic, Exit, FiberId, Time};
use core::fmt;
use node::{Cont, Finalizer, ForkMode, Node, Recover};
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A lazy, re-runnable description of a computation.
pub struct Effect<A, E> {
    node: Arc<Node>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.node.kind()).finish()
    }
}

/// Handle to the scope of a fiber, used to fork work that the fiber (rather
/// than the forking fiber) supervises. See [`Effect::fork_in`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberScope {
    owner: FiberId,
}

impl FiberScope {
    /// The fiber that supervises work forked into this scope.
    #[must_use]
    pub const fn owner(&self) -> FiberId {
        self.owner
    }
}

/// Restores the interruptibility that was in effect outside an
/// [`Effect::uninterruptible_mask`].
#[derive(Debug, Clone, Copy)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the outer interruptibility.
    pub fn apply<B: Data, E2: Data>(self, effect: Effect<B, E2>) -> Effect<B, E2> {
        Effect::from_node(Node::SetInterruptible {
            body: effect.node,
            interruptible: self.interruptible,
        })
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self::from_arc(Arc::new(node))
    }

    pub(crate) fn from_arc(node: Arc<Node>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    // === Constructors ===

    /// Succeeds with `value`.
    pub fn succeed(value: A) -> Self {
        Self::from_node(Node::Succeed(value::erase(value)))
    }

    /// Fails with a typed error.
    pub fn fail(error: E) -> Self {
        Self::fail_cause(Cause::Fail(error))
    }

    /// Fails with an arbitrary cause.
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_node(Node::Fail(erase_cause(cause)))
    }

    /// Fails with a defect.
    pub fn die(message: impl Into<String>) -> Self {
        Self::from_node(Node::Fail(Cause::defect(message)))
    }

    /// Fails with an interruption attributed to the running fiber.
    pub fn interrupt() -> Self {
        Self::with_context(|ctx| Self::fail_cause(Cause::interrupt(ctx.fiber_id())))
    }

    /// Runs `f` on the fiber when the effect is reduced.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Node::Sync(Arc::new(move || Ok(value::erase(f())))))
    }

    /// Runs a fallible `f`; `Err` becomes a typed failure.
    pub fn try_sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Node::Sync(Arc::new(move || match f() {
            Ok(a) => Ok(value::erase(a)),
            Err(e) => Err(Cause::Fail(value::erase(e))),
        })))
    }

    /// Builds the effect to run only when it is reduced.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::with_context(move |_| f())
    }

    /// Suspends the fiber until `register`'s callback is completed.
    ///
    /// `register` runs on the fiber. It may complete the callback before it
    /// returns, later from any thread, or never. The optional [`Canceler`]
    /// runs if the fiber is interrupted while waiting.
    pub fn async_callback<F>(register: F) -> Self
    where
        F: Fn(Callback<A, E>) -> Option<Canceler> + Send + Sync + 'static,
    {
        Self::from_node(Node::Async(Arc::new(move |resumer| {
            register(Callback::new(resumer))
        })))
    }

    /// Never completes; only interruption ends it.
    pub fn never() -> Self {
        Self::from_node(Node::Async(Arc::new(|_| None)))
    }

    /// Builds the effect from the running fiber's context.
    pub(crate) fn with_context<F>(f: F) -> Self
    where
        F: Fn(&FiberContext<'_>) -> Self + Send + Sync + 'static,
    {
        Self::from_node(Node::WithContext(Arc::new(move |ctx: &FiberContext<'_>| {
            f(ctx).node
        })))
    }

    /// Uninterruptible region whose body can restore the outer
    /// interruptibility for sub-regions.
    pub fn uninterruptible_mask<F>(f: F) -> Self
    where
        F: Fn(Restore) -> Self + Send + Sync + 'static,
    {
        Self::with_context(move |ctx| {
            f(Restore {
                interruptible: ctx.is_interruptible(),
            })
            .uninterruptible()
        })
    }

    /// Acquires a resource and registers `release` on the current scope, as
    /// one uninterruptible step.
    pub fn acquire_release<R>(acquire: Self, release: R) -> Self
    where
        R: Fn(A, &DynExit) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let release = Arc::new(release);
        acquire
            .flat_map(move |a: A| {
                let release = release.clone();
                let held = a.clone();
                Effect::<(), E>::add_finalizer(move |exit| release(held.clone(), exit))
                    .map(move |()| a.clone())
            })
            .uninterruptible()
    }

    /// Acquires a resource, uses it with interruption restored, and releases
    /// it with the use's exit. The release runs exactly once however the use
    /// ends.
    pub fn acquire_use_release<R, U, Rel>(acquire: Effect<R, E>, use_fn: U, release: Rel) -> Self
    where
        R: Data,
        U: Fn(R) -> Self + Send + Sync + 'static,
        Rel: Fn(R, &Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let use_fn = Arc::new(use_fn);
        let release = Arc::new(release);
        Self::uninterruptible_mask(move |restore| {
            let use_fn = use_fn.clone();
            let release = release.clone();
            acquire.flat_map(move |r: R| {
                let release = release.clone();
                let held = r.clone();
                restore
                    .apply(use_fn(r))
                    .on_exit(move |exit: &Exit<A, E>| release(held.clone(), exit))
            })
        })
    }

    // === Operators ===

    /// Sequences `f` after a success.
    pub fn flat_map<B, F>(&self, f: F) -> Effect<B, E>
    where
        B: Data,
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        let next: Cont = Arc::new(move |v: Dynamic| match value::take::<A>(v) {
            Ok(a) => f(a).node,
            Err(_) => mismatch::<A>(),
        });
        Effect::from_node(Node::FlatMap {
            first: self.node.clone(),
            next,
        })
    }

    /// Transforms the success value.
    pub fn map<B, F>(&self, f: F) -> Effect<B, E>
    where
        B: Data,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let next: Cont = Arc::new(move |v: Dynamic| match value::take::<A>(v) {
            Ok(a) => Arc::new(Node::Succeed(value::erase(f(a)))),
            Err(_) => mismatch::<A>(),
        });
        Effect::from_node(Node::FlatMap {
            first: self.node.clone(),
            next,
        })
    }

    /// Runs `that` after a success, keeping its value.
    pub fn zip_right<B: Data>(&self, that: Effect<B, E>) -> Effect<B, E> {
        self.flat_map(move |_| that.clone())
    }

    /// Transforms every typed failure in the cause.
    pub fn map_err<E2, F>(&self, f: F) -> Effect<A, E2>
    where
        E2: Data,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        self.fold_cause_effect(
            move |cause| Effect::fail_cause(cause.map(&f)),
            Effect::succeed,
        )
    }

    /// Handles both outcomes, with access to the full failure cause.
    ///
    /// The failure handler is skipped while an interruption of the fiber is
    /// unwinding through an interruptible region.
    pub fn fold_cause_effect<B, E2, F, S>(&self, on_failure: F, on_success: S) -> Effect<B, E2>
    where
        B: Data,
        E2: Data,
        F: Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        let on_failure: Recover = Arc::new(move |c: Cause<Dynamic>| on_failure(downcast_cause(c)).node);
        let on_success: Cont = Arc::new(move |v: Dynamic| match value::take::<A>(v) {
            Ok(a) => on_success(a).node,
            Err(_) => mismatch::<A>(),
        });
        Effect::from_node(Node::Fold {
            first: self.node.clone(),
            on_failure,
            on_success,
        })
    }

    /// Recovers from typed failures. A cause without typed failures, or one
    /// that also carries a defect, propagates unchanged.
    pub fn catch_all<E2, F>(&self, f: F) -> Effect<A, E2>
    where
        E2: Data,
        F: Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    {
        let on_failure: Recover = Arc::new(move |c: Cause<Dynamic>| {
            if c.contains_defect() {
                return Arc::new(Node::Fail(c));
            }
            match downcast_cause::<E>(c.clone()).first_failure() {
                Some(e) => f(e.clone()).node,
                None => Arc::new(Node::Fail(c)),
            }
        });
        let on_success: Cont = Arc::new(|v: Dynamic| Arc::new(Node::Succeed(v)));
        Effect::from_node(Node::Fold {
            first: self.node.clone(),
            on_failure,
            on_success,
        })
    }

    /// Recovers from any failure cause.
    pub fn catch_all_cause<E2, F>(&self, f: F) -> Effect<A, E2>
    where
        E2: Data,
        F: Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    {
        self.fold_cause_effect(f, Effect::succeed)
    }

    /// Surfaces the outcome as a value.
    pub fn exit<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        self.fold_cause_effect(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |a| Effect::succeed(Exit::Success(a)),
        )
    }

    /// Starts the effect on a child fiber supervised by the running fiber.
    pub fn fork<E2: Data>(&self) -> Effect<FiberHandle<A, E>, E2> {
        self.fork_with(ForkMode::Child)
    }

    /// Starts the effect on a fiber with no parent. It is not interrupted
    /// when the forking fiber ends.
    pub fn fork_daemon<E2: Data>(&self) -> Effect<FiberHandle<A, E>, E2> {
        self.fork_with(ForkMode::Daemon)
    }

    /// Starts the effect on a child of `scope`'s owner. If the owner has
    /// already finished, the new fiber is interrupted at once.
    pub fn fork_in<E2: Data>(&self, scope: FiberScope) -> Effect<FiberHandle<A, E>, E2> {
        self.fork_with(ForkMode::In(scope.owner))
    }

    fn fork_with<E2: Data>(&self, mode: ForkMode) -> Effect<FiberHandle<A, E>, E2> {
        let next: Cont = Arc::new(|v: Dynamic| match value::take::<FiberLink>(v) {
            Ok(link) => Arc::new(Node::Succeed(value::erase(FiberHandle::<A, E>::new(link)))),
            Err(_) => mismatch::<FiberLink>(),
        });
        Effect::from_node(Node::FlatMap {
            first: Arc::new(Node::Fork {
                child: self.node.clone(),
                mode,
            }),
            next,
        })
    }

    /// Runs with interruption disabled.
    pub fn uninterruptible(&self) -> Self {
        Self::from_node(Node::SetInterruptible {
            body: self.node.clone(),
            interruptible: false,
        })
    }

    /// Runs with interruption enabled, even inside an uninterruptible region.
    pub fn interruptible(&self) -> Self {
        Self::from_node(Node::SetInterruptible {
            body: self.node.clone(),
            interruptible: true,
        })
    }

    /// Runs `finalizer` after the effect, however it ends.
    pub fn ensuring(&self, finalizer: Effect<(), Infallible>) -> Self {
        let finalizer: Finalizer = Arc::new(move |_: &DynExit| finalizer.node.clone());
        Self::from_node(Node::OnExit {
            body: self.node.clone(),
            finalizer,
        })
    }

    /// Runs `f` with the effect's exit, however it ends.
    pub fn on_exit<F>(&self, f: F) -> Self
    where
        F: Fn(&Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let finalizer: Finalizer =
            Arc::new(move |exit: &DynExit| f(&exit.clone().downcast::<A, E>()).node);
        Self::from_node(Node::OnExit {
            body: self.node.clone(),
            finalizer,
        })
    }

    /// Runs the effect in a fresh scope, closed when the effect ends.
    pub fn scoped(&self) -> Self {
        Self::from_node(Node::Scoped(self.node.clone()))
    }

    /// Repeats the effect until it fails.
    pub fn forever(&self) -> Effect<Infallible, E> {
        let this = self.clone();
        self.flat_map(move |_| this.forever())
    }

    /// Runs both effects concurrently; the first to succeed wins and the
    /// other is interrupted. See [`crate::combinator::race`].
    pub fn race(&self, that: Self) -> Self {
        crate::combinator::race(self.clone(), that)
    }

    /// `None` if the effect does not finish within `duration`.
    pub fn timeout(&self, duration: Duration) -> Effect<Option<A>, E> {
        crate::combinator::timeout(self.clone(), duration)
    }
}

impl<E: Data> Effect<(), E> {
    /// Succeeds with `()`.
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Suspends the fiber for `duration`, measured by the runtime's clock.
    /// A zero duration yields.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_node(Node::Sleep(duration))
    }

    /// Lets other fibers run.
    pub fn yield_now() -> Self {
        Self::from_node(Node::Yield)
    }

    /// Registers `f` on the current scope. It runs, uninterruptibly, when the
    /// scope closes and receives the exit that closed it.
    pub fn add_finalizer<F>(f: F) -> Self
    where
        F: Fn(&DynExit) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_node(Node::AddFinalizer(Arc::new(move |exit: &DynExit| f(exit).node)))
    }
}

impl<E: Data> Effect<FiberId, E> {
    /// The running fiber's id.
    pub fn fiber_id() -> Self {
        Self::with_context(|ctx| Self::succeed(ctx.fiber_id()))
    }
}

impl<E: Data> Effect<Time, E> {
    /// The runtime clock's current time.
    pub fn now() -> Self {
        Self::with_context(|ctx| Self::succeed(ctx.now()))
    }
}

impl<E: Data> Effect<FiberScope, E> {
    /// The running fiber's scope, for [`Effect::fork_in`].
    pub fn fiber_scope() -> Self {
        Self::with_context(|ctx| {
            Self::succeed(FiberScope {
                owner: ctx.fiber_id(),
            })
        })
    }
}

/// Node returned when an erased value is not of the expected type.
fn mismatch<A>() -> Arc<Node> {
    Arc::new(Node::Fail(Cause::defect(format!(
        "value is not a {}",
        std::any::type_name::<A>()
    ))))
}

/// Recovers a typed exit from the value a join produced.
pub(crate) fn exit_of<A: Data, E: Data>(v: Dynamic) -> Exit<A, E> {
    match value::take::<DynExit>(v) {
        Ok(exit) => exit.downcast(),
        Err(_) => Exit::defect("join produced something other than an exit"),
    }
}
