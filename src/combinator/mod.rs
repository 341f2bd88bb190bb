//! Combinators derived from `fork` and interruption.
//!
//! Nothing here is a scheduler primitive: every combinator forks children,
//! waits on a [`Deferred`](crate::sync::Deferred) and interrupts the fibers it
//! no longer needs.
//!
//! - [`race`](race()): first success wins
//! - [`race_first`]: first exit wins
//! - [`timeout`](timeout()): race against a sleeping fiber

pub mod race;
pub mod timeout;

pub use race::{race, race_first};
pub use timeout::timeout;
