//! Fibra: a fiber runtime with structured concurrency, typed failure causes
//! and guaranteed finalization.
//!
//! # Overview
//!
//! Computations are described as inert [`Effect`] values and reduced by a
//! trampolining interpreter on lightweight fibers. Fibers are multiplexed
//! cooperatively over a small pool of worker threads, or driven step by step
//! on the calling thread by the deterministic [`LabRuntime`].
//!
//! # Core Guarantees
//!
//! - **No orphan fibers**: a fiber does not publish its exit until every
//!   child it supervises has ended
//! - **Finalization**: finalizers run exactly once, in reverse registration
//!   order, on success, failure and interruption alike
//! - **Typed causes**: failures keep their full structure ([`Cause`]):
//!   sequential and parallel composition, defects and interruptions
//! - **Deterministic testing**: the lab runtime uses virtual time and a
//!   seeded schedule
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, time, [`Cause`] and [`Exit`]
//! - [`effect`]: Computation descriptions and the typed [`Effect`] API
//! - [`fiber_ref`]: Fiber-local state with fork/join policies
//! - [`record`]: Fiber and scope status types
//! - [`runtime`]: Interpreter, scheduler and the threaded [`Runtime`]
//! - [`supervisor`]: Lifecycle observers
//! - [`trace`]: Recorded lifecycle events
//! - [`lab`]: Deterministic lab runtime for testing
//! - [`sync`]: Deferred, semaphore and queue for fibers
//! - [`combinator`]: Race and timeout
//! - [`time`]: Wall and virtual clocks
//! - [`util`]: Internal utilities (deterministic RNG, arenas)
//! - [`error`]: Runtime-level error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod effect;
pub mod error;
pub mod fiber_ref;
pub mod lab;
pub mod record;
pub mod runtime;
pub mod supervisor;
pub mod sync;
pub mod time;
pub mod trace;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_utils;

// Re-exports for convenient access to core types
pub use effect::{Callback, Canceler, Effect, FiberScope, Restore};
pub use error::{ConfigError, Error, ErrorKind, Result};
pub use fiber_ref::FiberRef;
pub use lab::{LabConfig, LabRuntime};
pub use runtime::{FiberHandle, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeSnapshot};
pub use supervisor::{CompositeSupervisor, NoopSupervisor, Supervisor};
pub use sync::{Deferred, Queue, Semaphore};
pub use time::{TimeSource, VirtualClock, WallClock};
pub use trace::{TraceEvent, TraceSupervisor};
pub use types::{Cause, Data, DefectPayload, DynExit, Dynamic, Exit, FiberId, FiberRefId, Time};
