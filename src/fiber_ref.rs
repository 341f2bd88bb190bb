//! Fiber-local cells with fork/join inheritance.
//!
//! Every fiber owns a [`FiberRefs`] map that no other fiber can reach. On
//! fork the child receives a snapshot of the parent's map with each ref's
//! fork policy applied; on [`join`](crate::runtime::FiberHandle::join) the
//! values the child wrote are merged back with each ref's join policy.

use crate::effect::node::{Node, RefUpdateFn};
use crate::effect::Effect;
use crate::types::{value, Data, Dynamic, FiberRefId};
use core::fmt;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

type ForkFn = Arc<dyn Fn(&Dynamic) -> Dynamic + Send + Sync>;
type JoinFn = Arc<dyn Fn(&Dynamic, &Dynamic) -> Dynamic + Send + Sync>;

/// Untyped definition shared by every copy of a [`FiberRef`].
pub(crate) struct FiberRefDef {
    pub(crate) id: FiberRefId,
    initial: Dynamic,
    fork: ForkFn,
    join: JoinFn,
}

impl fmt::Debug for FiberRefDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRefDef").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
struct Entry {
    def: Arc<FiberRefDef>,
    value: Dynamic,
    written: bool,
}

/// The per-fiber map from ref identity to current value.
#[derive(Clone, Default)]
pub(crate) struct FiberRefs {
    entries: HashMap<FiberRefId, Entry>,
}

impl FiberRefs {
    /// Current value, or the ref's initial value if never set in this fiber.
    pub(crate) fn get(&self, def: &Arc<FiberRefDef>) -> Dynamic {
        self.entries
            .get(&def.id)
            .map_or_else(|| def.initial.clone(), |e| e.value.clone())
    }

    pub(crate) fn set(&mut self, def: &Arc<FiberRefDef>, value: Dynamic) {
        self.entries.insert(
            def.id,
            Entry {
                def: def.clone(),
                value,
                written: true,
            },
        );
    }

    /// Snapshot for a new child, with each fork policy applied.
    pub(crate) fn fork(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(id, e)| {
                (
                    *id,
                    Entry {
                        def: e.def.clone(),
                        value: (e.def.fork)(&e.value),
                        written: false,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Merges the values a joined child wrote.
    pub(crate) fn join(&mut self, child: &Self) {
        for entry in child.entries.values().filter(|e| e.written) {
            let parent = self.get(&entry.def);
            let merged = (entry.def.join)(&parent, &entry.value);
            self.set(&entry.def, merged);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A fiber-local cell holding an `A`.
///
/// ```
/// use fibra::{Effect, FiberRef, LabRuntime, LabConfig};
///
/// let program = FiberRef::<u32>::make(1).flat_map(|r| {
///     let read = r.get();
///     r.locally(5, read.clone()).flat_map(move |inner| read.clone().map(move |outer| (inner, outer)))
/// });
/// let mut lab = LabRuntime::new(LabConfig::default());
/// let exit = lab.block_on::<_, ()>(program).unwrap();
/// assert_eq!(exit.unwrap(), (5, 1));
/// ```
pub struct FiberRef<A> {
    def: Arc<FiberRefDef>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FiberRef").field(&self.def.id).finish()
    }
}

impl<A: Data> FiberRef<A> {
    /// A ref whose children start with a copy and whose joined children's
    /// writes replace the parent's value.
    pub fn make<E: Data>(initial: A) -> Effect<Self, E> {
        Self::make_with(initial, A::clone, |_parent, child| child.clone())
    }

    /// A ref whose children start with a copy and never affect the parent.
    pub fn make_isolated<E: Data>(initial: A) -> Effect<Self, E> {
        Self::make_with(initial, A::clone, |parent, _child| parent.clone())
    }

    /// A ref with custom policies: `fork` computes a child's starting value
    /// from the parent's; `join` combines `(parent, child)` on join.
    pub fn make_with<E, F, J>(initial: A, fork: F, join: J) -> Effect<Self, E>
    where
        E: Data,
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        let fork: ForkFn = Arc::new(move |v: &Dynamic| match value::peek::<A>(v) {
            Some(a) => value::erase(fork(&a)),
            None => v.clone(),
        });
        let join: JoinFn = Arc::new(move |parent: &Dynamic, child: &Dynamic| {
            match (value::peek::<A>(parent), value::peek::<A>(child)) {
                (Some(p), Some(c)) => value::erase(join(&p, &c)),
                _ => child.clone(),
            }
        });
        let initial = value::erase(initial);
        Effect::with_context(move |ctx| {
            let def = Arc::new(FiberRefDef {
                id: ctx.next_ref_id(),
                initial: initial.clone(),
                fork: fork.clone(),
                join: join.clone(),
            });
            Effect::succeed(Self {
                def,
                _marker: PhantomData,
            })
        })
    }

    /// The ref's identity.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.def.id
    }

    /// Reads the current fiber's value.
    pub fn get<E: Data>(&self) -> Effect<A, E> {
        Effect::from_node(Node::RefGet(self.def.clone()))
    }

    /// Replaces the current fiber's value.
    pub fn set<E: Data>(&self, new_value: A) -> Effect<(), E> {
        let new_value = value::erase(new_value);
        self.update_raw(Arc::new(move |_: &Dynamic| (value::unit(), new_value.clone())))
    }

    /// Applies `f` to the current fiber's value.
    pub fn update<E: Data>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<(), E> {
        self.modify(move |a| ((), f(a)))
    }

    /// Applies `f`, storing the second component and returning the first.
    pub fn modify<B, E, F>(&self, f: F) -> Effect<B, E>
    where
        B: Data,
        E: Data,
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        self.update_raw(Arc::new(move |current: &Dynamic| match value::peek::<A>(current) {
            Some(a) => {
                let (b, next) = f(a);
                (value::erase(b), value::erase(next))
            }
            None => (value::unit(), current.clone()),
        }))
    }

    /// Runs `effect` with the ref set to `value`, restoring the previous value
    /// however `effect` ends (success, failure or interruption).
    pub fn locally<B: Data, E: Data>(&self, value: A, effect: Effect<B, E>) -> Effect<B, E> {
        self.locally_with(move |_| value.clone(), effect)
    }

    /// Like [`locally`](Self::locally) with the override computed from the
    /// current value.
    pub fn locally_with<B, E, F>(&self, f: F, effect: Effect<B, E>) -> Effect<B, E>
    where
        B: Data,
        E: Data,
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::uninterruptible_mask(move |restore| {
            let this = this.clone();
            let f = f.clone();
            let effect = effect.clone();
            let reset = this.clone();
            this.modify::<A, E, _>(move |old: A| {
                let next = (*f)(old.clone());
                (old, next)
            })
            .flat_map(move |old: A| {
                restore
                    .apply(effect.clone())
                    .ensuring(reset.set::<std::convert::Infallible>(old))
            })
        })
    }

    /// `update` must return a value of type `B`.
    fn update_raw<B: Data, E: Data>(&self, update: RefUpdateFn) -> Effect<B, E> {
        Effect::from_node(Node::RefUpdate {
            def: self.def.clone(),
            update,
        })
    }
}
