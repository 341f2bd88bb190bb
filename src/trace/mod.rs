//! Lifecycle tracing.
//!
//! [`TraceSupervisor`] turns supervisor callbacks into [`TraceEvent`]s kept
//! in a bounded [`TraceBuffer`]. The lab runtime installs one so a failing
//! deterministic run can be inspected event by event.
//!
//! # Submodules
//!
//! - [`event`]: trace events and their data
//! - [`buffer`]: ring buffer for recent events
//! - [`recorder`]: the recording supervisor

pub mod buffer;
pub mod event;
pub mod recorder;

pub use buffer::{TraceBuffer, TraceBufferHandle};
pub use event::{ExitKind, TraceData, TraceEvent, TraceEventKind};
pub use recorder::TraceSupervisor;
