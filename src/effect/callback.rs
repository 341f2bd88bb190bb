//! Bridges between external event sources and suspended fibers.

use crate::runtime::shared::{Resumer, Resumption};
use crate::types::exit::erase_cause;
use crate::types::{value, Cause, Data, Exit, FiberId};
use core::fmt;
use std::marker::PhantomData;

/// Cleanup run when a fiber suspended in
/// [`Effect::async_callback`](crate::effect::Effect::async_callback) is
/// interrupted before its callback fired.
pub struct Canceler(Box<dyn FnOnce() + Send>);

impl Canceler {
    /// Wraps a cleanup action.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Canceler")
    }
}

/// The single resumption handle of a suspended fiber.
///
/// Completing consumes the callback. A completion that arrives after the
/// fiber moved on (it was interrupted, or the runtime is gone) is rejected
/// and the method returns `false`; the value is dropped.
pub struct Callback<A, E> {
    resumer: Resumer,
    _marker: PhantomData<fn(A, E)>,
}

impl<A: Data, E: Data> Callback<A, E> {
    pub(crate) fn new(resumer: Resumer) -> Self {
        Self {
            resumer,
            _marker: PhantomData,
        }
    }

    /// The fiber this callback resumes.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.resumer.fiber_id()
    }

    /// Resumes the fiber with a value.
    pub fn succeed(self, value: A) -> bool {
        self.resumer
            .resume(Resumption::Value(value::erase(value)))
    }

    /// Resumes the fiber with a typed failure.
    pub fn fail(self, error: E) -> bool {
        self.fail_cause(Cause::Fail(error))
    }

    /// Resumes the fiber with an arbitrary cause.
    pub fn fail_cause(self, cause: Cause<E>) -> bool {
        self.resumer
            .resume(Resumption::Failure(erase_cause(cause)))
    }

    /// Resumes the fiber with an exit.
    pub fn complete(self, exit: Exit<A, E>) -> bool {
        match exit {
            Exit::Success(v) => self.succeed(v),
            Exit::Failure(c) => self.fail_cause(c),
        }
    }
}

impl<A, E> fmt::Debug for Callback<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("fiber", &self.resumer.fiber_id())
            .finish()
    }
}
