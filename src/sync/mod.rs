//! Synchronization primitives for fibers.
//!
//! Waiting never blocks a thread: a fiber that has to wait suspends through
//! [`Effect::async_callback`](crate::Effect::async_callback) and is resumed
//! through its single callback. Each primitive keeps its state behind one
//! `parking_lot` mutex.
//!
//! # Primitives
//!
//! - [`Deferred`]: write-once cell; every waiter receives the exit
//! - [`Semaphore`]: counting semaphore with FIFO waiters
//! - [`Queue`]: bounded FIFO queue; capacity zero is a rendezvous
//!
//! # Cancel Safety
//!
//! - Interruption while waiting: the waiter is removed, nothing is consumed
//! - Interruption while holding a permit through `with_permit`: the permit
//!   is released
//! - A hand-off that races with an interruption is rejected by the stale
//!   callback and offered to the next waiter
//! - A hand-off accepted before the interruption is observed is delivered:
//!   the permit or item reaches the code after the wait

mod deferred;
mod queue;
mod semaphore;

pub use deferred::Deferred;
pub use queue::Queue;
pub use semaphore::Semaphore;
