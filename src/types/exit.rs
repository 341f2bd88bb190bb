//! Terminal outcome of a fiber.

use super::cause::Cause;
use super::id::FiberId;
use super::value::{self, Data, Dynamic};
use core::fmt;

/// How a fiber ended: with a value or with a [`Cause`].
///
/// An exit is produced exactly once per fiber and then only read; every joiner
/// receives its own clone.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<A, E> {
    /// The computation produced a value.
    Success(A),
    /// The computation ended without a value.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// A defect.
    #[must_use]
    pub fn defect(message: impl Into<String>) -> Self {
        Self::Failure(Cause::defect(message))
    }

    /// An interruption attributed to `by`.
    #[must_use]
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(by))
    }

    /// True for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// True for `Failure`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// True when the failure cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(c) if c.is_interrupted())
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> Exit<B, E> {
        match self {
            Self::Success(v) => Exit::Success(f(v)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps every typed failure in the cause.
    pub fn map_err<E2, F: Fn(E) -> E2>(self, f: F) -> Exit<A, E2> {
        match self {
            Self::Success(v) => Exit::Success(v),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Converts into a `Result`, keeping the full cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(c) => Err(c),
        }
    }

    /// Returns the success value.
    ///
    /// # Panics
    ///
    /// Panics on `Failure`.
    #[track_caller]
    pub fn unwrap(self) -> A
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(v) => v,
            Self::Failure(c) => panic!("called `Exit::unwrap()` on a `Failure`: {c:?}"),
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::fail(e),
        }
    }
}

/// The exit shape the interpreter works with.
pub type DynExit = Exit<Dynamic, Dynamic>;

impl DynExit {
    /// Recovers a typed exit. Values or failures of an unexpected type become
    /// defects rather than panics.
    pub(crate) fn downcast<A: Data, E: Data>(self) -> Exit<A, E> {
        match self {
            Self::Success(v) => match value::take::<A>(v) {
                Ok(a) => Exit::Success(a),
                Err(_) => Exit::defect(format!(
                    "value is not a {}",
                    std::any::type_name::<A>()
                )),
            },
            Self::Failure(c) => Exit::Failure(downcast_cause(c)),
        }
    }
}

impl<A: Data, E: Data> Exit<A, E> {
    /// Erases the value and error types.
    pub(crate) fn erase(self) -> DynExit {
        match self {
            Self::Success(v) => Exit::Success(value::erase(v)),
            Self::Failure(c) => Exit::Failure(erase_cause(c)),
        }
    }
}

/// Erases the failure type of a cause.
pub(crate) fn erase_cause<E: Data>(cause: Cause<E>) -> Cause<Dynamic> {
    cause.map(value::erase)
}

/// Recovers a typed cause; failures of another type turn into defects.
pub(crate) fn downcast_cause<E: Data>(cause: Cause<Dynamic>) -> Cause<E> {
    match cause {
        Cause::Empty => Cause::Empty,
        Cause::Fail(e) => match value::take::<E>(e) {
            Ok(e) => Cause::Fail(e),
            Err(_) => Cause::defect(format!(
                "failure is not a {}",
                std::any::type_name::<E>()
            )),
        },
        Cause::Defect(d) => Cause::Defect(d),
        Cause::Interrupt(id) => Cause::Interrupt(id),
        Cause::Then(l, r) => Cause::Then(
            Box::new(downcast_cause(*l)),
            Box::new(downcast_cause(*r)),
        ),
        Cause::Both(l, r) => Cause::Both(
            Box::new(downcast_cause(*l)),
            Box::new(downcast_cause(*r)),
        ),
    }
}
