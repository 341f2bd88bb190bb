//! Type-erased values carried through the interpreter.
//!
//! A computation description is reduced by one non-generic interpreter, so
//! values and failure payloads travel as [`Dynamic`]. The typed [`Effect`]
//! layer erases on the way in and downcasts on the way out.
//!
//! [`Effect`]: crate::effect::Effect

use std::any::Any;
use std::sync::Arc;

/// A shared, type-erased value.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Bound for anything that flows through an effect as a value or error.
///
/// `Clone` is needed because an [`Exit`](crate::types::Exit) fans out to every
/// joiner and a description may be run more than once.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

/// Erases a value.
pub(crate) fn erase<A: Data>(value: A) -> Dynamic {
    Arc::new(value)
}

/// The erased unit value.
pub(crate) fn unit() -> Dynamic {
    Arc::new(())
}

/// Recovers a typed value, cloning only when the erased value is shared.
pub(crate) fn take<A: Data>(value: Dynamic) -> Result<A, Dynamic> {
    match value.downcast::<A>() {
        Ok(shared) => Ok(Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone())),
        Err(original) => Err(original),
    }
}

/// Borrowing variant of [`take`].
pub(crate) fn peek<A: Data>(value: &Dynamic) -> Option<A> {
    value.downcast_ref::<A>().cloned()
}
