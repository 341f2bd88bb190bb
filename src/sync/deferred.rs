//! One-shot cell that fibers can wait on.
//!
//! A [`Deferred`] is completed at most once, with an [`Exit`]. Every fiber
//! waiting on it is resumed with its own clone of that exit; fibers that
//! arrive later see it immediately.
//!
//! # Cancel Safety
//!
//! - `wait()`: an interrupted waiter is removed from the waiter list and
//!   never receives the exit.
//! - `complete()`: not interruptible in the middle; waiters are resumed after
//!   the cell's lock is released.

use crate::effect::{Callback, Canceler, Effect};
use crate::types::{Cause, Data, Exit};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

struct State<A, E> {
    exit: Option<Exit<A, E>>,
    waiters: Vec<(u64, Callback<A, E>)>,
    next_key: u64,
}

/// A write-once synchronization cell.
///
/// ```
/// use fibra::sync::Deferred;
/// use fibra::{Effect, LabRuntime};
///
/// let d = Deferred::<u32, ()>::new();
/// let program = d
///     .wait()
///     .fork::<()>()
///     .flat_map({
///         let d = d.clone();
///         move |waiter| d.succeed::<()>(7).zip_right(waiter.join())
///     });
///
/// let mut lab = LabRuntime::new(Default::default());
/// assert_eq!(lab.block_on(program).expect("progress").unwrap(), 7);
/// ```
pub struct Deferred<A, E> {
    inner: Arc<Mutex<State<A, E>>>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Deferred")
            .field("done", &state.exit.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<A: Data, E: Data> Default for Deferred<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Data, E: Data> Deferred<A, E> {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                exit: None,
                waiters: Vec::new(),
                next_key: 0,
            })),
        }
    }

    /// Creates an empty cell as an effect.
    pub fn make<E2: Data>() -> Effect<Self, E2> {
        Effect::sync(Self::new)
    }

    /// Completes the cell. The effect yields `false` if it was already
    /// complete, in which case nothing changes.
    pub fn complete<E2: Data>(&self, exit: Exit<A, E>) -> Effect<bool, E2> {
        let this = self.clone();
        Effect::sync(move || this.try_complete(exit.clone()))
    }

    /// Completes the cell with a value.
    pub fn succeed<E2: Data>(&self, value: A) -> Effect<bool, E2> {
        self.complete(Exit::Success(value))
    }

    /// Completes the cell with a typed failure.
    pub fn fail<E2: Data>(&self, error: E) -> Effect<bool, E2> {
        self.complete(Exit::Failure(Cause::Fail(error)))
    }

    /// Suspends until the cell is complete, then continues with its exit.
    pub fn wait(&self) -> Effect<A, E> {
        let inner = self.inner.clone();
        Effect::async_callback(move |cb: Callback<A, E>| {
            let mut state = inner.lock();
            if let Some(exit) = state.exit.clone() {
                drop(state);
                cb.complete(exit);
                return None;
            }
            let key = state.next_key;
            state.next_key += 1;
            state.waiters.push((key, cb));
            drop(state);

            let inner = inner.clone();
            Some(Canceler::new(move || {
                inner.lock().waiters.retain(|(k, _)| *k != key);
            }))
        })
    }

    /// The exit, if complete, as an effect.
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let this = self.clone();
        Effect::sync(move || this.try_poll())
    }

    /// The exit, if complete. Never blocks.
    #[must_use]
    pub fn try_poll(&self) -> Option<Exit<A, E>> {
        self.inner.lock().exit.clone()
    }

    /// True once completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.lock().exit.is_some()
    }

    /// Completes the cell from outside any fiber. Returns `false` if it was
    /// already complete.
    pub fn try_complete(&self, exit: Exit<A, E>) -> bool {
        let waiters = {
            let mut state = self.inner.lock();
            if state.exit.is_some() {
                return false;
            }
            state.exit = Some(exit.clone());
            std::mem::take(&mut state.waiters)
        };
        for (_, cb) in waiters {
            cb.complete(exit.clone());
        }
        true
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}
