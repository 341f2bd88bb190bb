//! Trace events and data types.
//!
//! Each event records one observable step of a fiber's life. Events carry
//! the sequence number assigned by the recorder and the runtime clock's time,
//! so a lab run with a fixed seed produces the same trace every time.

use crate::effect::NodeKind;
use crate::record::BlockingOn;
use crate::types::{DynExit, FiberId, Time};
use core::fmt;
use serde::Serialize;

/// The kind of trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceEventKind {
    /// A fiber was created.
    Start,
    /// A fiber published its exit.
    End,
    /// A node was reduced.
    Effect,
    /// A fiber parked.
    Suspend,
    /// A suspended fiber started its next turn.
    Resume,
}

/// How a fiber ended, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitKind {
    /// Ended with a value.
    Success,
    /// Ended with typed failures only.
    Failure,
    /// Ended with a cause containing an interruption and no defect.
    Interrupted,
    /// Ended with a cause containing a defect.
    Defect,
}

impl ExitKind {
    /// Classifies an exit.
    #[must_use]
    pub fn of(exit: &DynExit) -> Self {
        match exit.cause() {
            None => Self::Success,
            Some(c) if c.contains_defect() => Self::Defect,
            Some(c) if c.is_interrupted() => Self::Interrupted,
            Some(_) => Self::Failure,
        }
    }
}

/// Additional data carried by a trace event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraceData {
    /// No additional data.
    None,
    /// End-of-fiber data.
    Exit(ExitKind),
    /// The reduced node.
    Node(NodeKind),
    /// What the fiber waits for.
    Blocking(BlockingOn),
}

/// A trace event in the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Sequence number (monotonically increasing).
    pub seq: u64,
    /// Timestamp when the event occurred.
    pub time: Time,
    /// The kind of event.
    pub kind: TraceEventKind,
    /// The fiber the event is about.
    pub fiber: FiberId,
    /// The fiber's parent; only known for `Start` events.
    pub parent: Option<FiberId>,
    /// Additional data.
    pub data: TraceData,
}

impl TraceEvent {
    /// Creates a new trace event.
    #[must_use]
    pub fn new(seq: u64, time: Time, kind: TraceEventKind, fiber: FiberId, data: TraceData) -> Self {
        Self {
            seq,
            time,
            kind,
            fiber,
            parent: None,
            data,
        }
    }

    /// Creates a start event.
    #[must_use]
    pub fn start(seq: u64, time: Time, fiber: FiberId, parent: Option<FiberId>) -> Self {
        Self {
            parent,
            ..Self::new(seq, time, TraceEventKind::Start, fiber, TraceData::None)
        }
    }

    /// Creates an end event.
    #[must_use]
    pub fn end(seq: u64, time: Time, fiber: FiberId, exit: &DynExit) -> Self {
        Self::new(seq, time, TraceEventKind::End, fiber, TraceData::Exit(ExitKind::of(exit)))
    }

    /// Creates an effect event.
    #[must_use]
    pub fn effect(seq: u64, time: Time, fiber: FiberId, node: NodeKind) -> Self {
        Self::new(seq, time, TraceEventKind::Effect, fiber, TraceData::Node(node))
    }

    /// Creates a suspend event.
    #[must_use]
    pub fn suspend(seq: u64, time: Time, fiber: FiberId, on: BlockingOn) -> Self {
        Self::new(seq, time, TraceEventKind::Suspend, fiber, TraceData::Blocking(on))
    }

    /// Creates a resume event.
    #[must_use]
    pub fn resume(seq: u64, time: Time, fiber: FiberId) -> Self {
        Self::new(seq, time, TraceEventKind::Resume, fiber, TraceData::None)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:06}] {} {:?} {}", self.seq, self.time, self.kind, self.fiber)?;
        if let Some(p) = self.parent {
            write!(f, " (parent: {p})")?;
        }
        match &self.data {
            TraceData::None => {}
            TraceData::Exit(kind) => write!(f, " {kind:?}")?,
            TraceData::Node(node) => write!(f, " {node:?}")?,
            TraceData::Blocking(on) => write!(f, " on {on:?}")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cause, Exit};

    #[test]
    fn exit_kind_classification() {
        let ok: DynExit = Exit::<u8, ()>::Success(1).erase();
        let failed: DynExit = Exit::<u8, &str>::fail("x").erase();
        let interrupted: DynExit = Exit::<u8, ()>::interrupt(FiberId::RUNTIME).erase();
        let defect: DynExit =
            Exit::<u8, ()>::Failure(Cause::interrupt(FiberId::RUNTIME).both(Cause::defect("d"))).erase();
        assert_eq!(ExitKind::of(&ok), ExitKind::Success);
        assert_eq!(ExitKind::of(&failed), ExitKind::Failure);
        assert_eq!(ExitKind::of(&interrupted), ExitKind::Interrupted);
        assert_eq!(ExitKind::of(&defect), ExitKind::Defect);
    }

    #[test]
    fn display_includes_parent_and_data() {
        let event = TraceEvent::start(3, Time::from_millis(2), FiberId::RUNTIME, Some(FiberId::RUNTIME));
        let text = event.to_string();
        assert!(text.starts_with("[000003]"), "{text}");
        assert!(text.contains("Start"), "{text}");
        assert!(text.contains("parent"), "{text}");
    }
}
