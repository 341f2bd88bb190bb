//! Deterministic lab runtime for testing.
//!
//! The lab runtime provides:
//!
//! - Virtual time (no wall-clock dependencies)
//! - Deterministic scheduling (same seed → same execution)
//! - Trace capture of fiber lifecycles
//! - Invariant checks over the fiber graph

pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::{InvariantViolation, LabRuntime};
