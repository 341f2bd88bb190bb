//! Internal records for runtime entities.
//!
//! This module contains the record types the runtime uses to track fibers
//! and the scopes that own their finalizers.
//!
//! The records themselves are implementation details; only the status types
//! surfaced through snapshots and supervisor hooks are public.

pub(crate) mod fiber;
pub(crate) mod scope;

pub use fiber::{BlockingOn, FiberStatus};
pub use scope::ScopeState;
