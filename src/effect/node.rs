//! The closed set of computation-description nodes.
//!
//! Nodes hold no execution state. A node tree may be reduced any number of
//! times by any number of fibers; only the interpreter's per-fiber frame stack
//! changes while it runs.

use crate::effect::callback::Canceler;
use crate::fiber_ref::FiberRefDef;
use crate::record::fiber::FiberLink;
use crate::runtime::interpreter::FiberContext;
use crate::runtime::shared::Resumer;
use crate::types::{Cause, DynExit, Dynamic, FiberId};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub(crate) type Thunk = Arc<dyn Fn() -> Result<Dynamic, Cause<Dynamic>> + Send + Sync>;
pub(crate) type Cont = Arc<dyn Fn(Dynamic) -> Arc<Node> + Send + Sync>;
pub(crate) type Recover = Arc<dyn Fn(Cause<Dynamic>) -> Arc<Node> + Send + Sync>;
pub(crate) type Register = Arc<dyn Fn(Resumer) -> Option<Canceler> + Send + Sync>;
pub(crate) type Finalizer = Arc<dyn Fn(&DynExit) -> Arc<Node> + Send + Sync>;
pub(crate) type ContextFn = Arc<dyn Fn(&FiberContext<'_>) -> Arc<Node> + Send + Sync>;
/// Maps the current value of a fiber ref to `(result, new value)`.
pub(crate) type RefUpdateFn = Arc<dyn Fn(&Dynamic) -> (Dynamic, Dynamic) + Send + Sync>;

/// Where a forked fiber is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForkMode {
    /// Child of the forking fiber.
    Child,
    /// No parent; outlives the forking fiber.
    Daemon,
    /// Child of the given ancestor.
    In(FiberId),
}

pub(crate) enum Node {
    Succeed(Dynamic),
    Fail(Cause<Dynamic>),
    Sync(Thunk),
    Async(Register),
    FlatMap {
        first: Arc<Node>,
        next: Cont,
    },
    Fold {
        first: Arc<Node>,
        on_failure: Recover,
        on_success: Cont,
    },
    Fork {
        child: Arc<Node>,
        mode: ForkMode,
    },
    AddFinalizer(Finalizer),
    OnExit {
        body: Arc<Node>,
        finalizer: Finalizer,
    },
    Scoped(Arc<Node>),
    SetInterruptible {
        body: Arc<Node>,
        interruptible: bool,
    },
    WithContext(ContextFn),
    RefGet(Arc<FiberRefDef>),
    RefUpdate {
        def: Arc<FiberRefDef>,
        update: RefUpdateFn,
    },
    Join {
        link: FiberLink,
        inherit_refs: bool,
    },
    Interrupt {
        link: FiberLink,
        wait: bool,
    },
    Sleep(Duration),
    Yield,
}

/// Node tag reported to [`Supervisor::on_effect`](crate::supervisor::Supervisor::on_effect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    /// A constant value.
    Succeed,
    /// A constant failure.
    Fail,
    /// A synchronous thunk.
    Sync,
    /// An asynchronous callback registration.
    Async,
    /// Sequencing.
    FlatMap,
    /// Failure/success handling.
    Fold,
    /// Fiber creation.
    Fork,
    /// Finalizer registration on the current scope.
    AddFinalizer,
    /// Body with a finalizer that sees its exit.
    OnExit,
    /// Nested scope.
    Scoped,
    /// Interruptibility region.
    SetInterruptible,
    /// Read of the running fiber's context.
    WithContext,
    /// Fiber-ref read.
    RefGet,
    /// Fiber-ref write.
    RefUpdate,
    /// Join or await of another fiber.
    Join,
    /// Interruption of another fiber.
    Interrupt,
    /// Timer.
    Sleep,
    /// Voluntary yield.
    Yield,
}

impl Node {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Succeed(_) => NodeKind::Succeed,
            Self::Fail(_) => NodeKind::Fail,
            Self::Sync(_) => NodeKind::Sync,
            Self::Async(_) => NodeKind::Async,
            Self::FlatMap { .. } => NodeKind::FlatMap,
            Self::Fold { .. } => NodeKind::Fold,
            Self::Fork { .. } => NodeKind::Fork,
            Self::AddFinalizer(_) => NodeKind::AddFinalizer,
            Self::OnExit { .. } => NodeKind::OnExit,
            Self::Scoped(_) => NodeKind::Scoped,
            Self::SetInterruptible { .. } => NodeKind::SetInterruptible,
            Self::WithContext(_) => NodeKind::WithContext,
            Self::RefGet(_) => NodeKind::RefGet,
            Self::RefUpdate { .. } => NodeKind::RefUpdate,
            Self::Join { .. } => NodeKind::Join,
            Self::Interrupt { .. } => NodeKind::Interrupt,
            Self::Sleep(_) => NodeKind::Sleep,
            Self::Yield => NodeKind::Yield,
        }
    }

    /// Moves structural children out so that dropping a deep chain never
    /// recurses on the host stack.
    fn take_children(&mut self, out: &mut Vec<Arc<Node>>) {
        let slot = match self {
            Self::FlatMap { first, .. } | Self::Fold { first, .. } => first,
            Self::Fork { child, .. } => child,
            Self::OnExit { body, .. }
            | Self::SetInterruptible { body, .. }
            | Self::Scoped(body) => body,
            _ => return,
        };
        let hole = placeholder();
        if !Arc::ptr_eq(slot, &hole) {
            out.push(std::mem::replace(slot, hole));
        }
    }
}

fn placeholder() -> Arc<Node> {
    static HOLE: OnceLock<Arc<Node>> = OnceLock::new();
    HOLE.get_or_init(|| Arc::new(Node::Yield)).clone()
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(child) = pending.pop() {
            if let Some(mut owned) = Arc::into_inner(child) {
                owned.take_children(&mut pending);
            }
        }
    }
}
