//! Handles to running fibers.

use crate::effect::node::Node;
use crate::effect::{exit_of, Effect};
use crate::record::fiber::FiberLink;
use crate::types::{Data, Dynamic, Exit, FiberId};
use core::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle to a fiber that ends with an [`Exit<A, E>`].
///
/// Handles are cheap to clone. Every operation that waits is itself an
/// effect, so waiting suspends the calling fiber rather than a thread.
pub struct FiberHandle<A, E> {
    link: FiberLink,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for FiberHandle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.link.id())
            .field("done", &self.link.is_done())
            .finish()
    }
}

impl<A: Data, E: Data> FiberHandle<A, E> {
    pub(crate) fn new(link: FiberLink) -> Self {
        Self {
            link,
            _marker: PhantomData,
        }
    }

    pub(crate) fn link(&self) -> &FiberLink {
        &self.link
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.link.id()
    }

    /// True once the fiber's exit is published.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.link.is_done()
    }

    /// The exit, if already published. Never blocks.
    #[must_use]
    pub fn try_exit(&self) -> Option<Exit<A, E>> {
        self.link.exit().map(|e| e.clone().downcast())
    }

    /// Waits for the fiber and continues with its outcome: its value on
    /// success, its cause on failure. The fiber refs it wrote are merged
    /// into the caller.
    pub fn join(&self) -> Effect<A, E> {
        Effect::<Dynamic, E>::from_arc(Arc::new(Node::Join {
            link: self.link.clone(),
            inherit_refs: true,
        }))
        .flat_map_dynamic(|v| match exit_of::<A, E>(v) {
            Exit::Success(a) => Effect::succeed(a),
            Exit::Failure(c) => Effect::fail_cause(c),
        })
    }

    /// Waits for the fiber and returns its exit. Fiber refs are not merged.
    pub fn await_exit<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        Effect::<Dynamic, E2>::from_arc(Arc::new(Node::Join {
            link: self.link.clone(),
            inherit_refs: false,
        }))
        .flat_map_dynamic(|v| Effect::succeed(exit_of::<A, E>(v)))
    }

    /// Interrupts the fiber and waits until it has finished, finalizers
    /// included.
    pub fn interrupt<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        Effect::<Dynamic, E2>::from_arc(Arc::new(Node::Interrupt {
            link: self.link.clone(),
            wait: true,
        }))
        .flat_map_dynamic(|v| Effect::succeed(exit_of::<A, E>(v)))
    }

    /// Requests interruption without waiting.
    pub fn interrupt_fork<E2: Data>(&self) -> Effect<(), E2> {
        Effect::<Dynamic, E2>::from_arc(Arc::new(Node::Interrupt {
            link: self.link.clone(),
            wait: false,
        }))
        .flat_map_dynamic(|_| Effect::unit())
    }

    /// The exit, if already published, as an effect.
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let this = self.clone();
        Effect::sync(move || this.try_exit())
    }
}

impl<E: Data> Effect<Dynamic, E> {
    /// Continues with the raw value a node produced, without the typed
    /// downcast `flat_map` performs.
    pub(crate) fn flat_map_dynamic<B, F>(&self, f: F) -> Effect<B, E>
    where
        B: Data,
        F: Fn(Dynamic) -> Effect<B, E> + Send + Sync + 'static,
    {
        Effect::from_node(Node::FlatMap {
            first: self.node().clone(),
            next: Arc::new(move |v: Dynamic| f(v).node().clone()),
        })
    }
}
