//! Two-lane ready queue.
//!
//! The scheduler uses two lanes:
//! 1. Interrupt lane (drained first) - fibers resumed by an interruption that
//!    must unwind
//! 2. Ready lane - all other runnable fibers, FIFO
//!
//! A fiber is in at most one lane at a time.

use crate::types::FiberId;
use crate::util::DetRng;
use std::collections::{HashSet, VecDeque};

/// Ready queue shared by the worker loops.
#[derive(Debug, Default)]
pub struct Scheduler {
    interrupt_lane: VecDeque<FiberId>,
    ready_lane: VecDeque<FiberId>,
    scheduled: HashSet<FiberId>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled fibers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Schedules a fiber on the ready lane. No-op if already scheduled.
    pub fn schedule(&mut self, fiber: FiberId) {
        if self.scheduled.insert(fiber) {
            self.ready_lane.push_back(fiber);
        }
    }

    /// Schedules a fiber on the interrupt lane, moving it there if it was
    /// already waiting on the ready lane.
    pub fn schedule_interrupt(&mut self, fiber: FiberId) {
        if self.scheduled.insert(fiber) {
            self.interrupt_lane.push_back(fiber);
        } else if !self.interrupt_lane.contains(&fiber) {
            self.ready_lane.retain(|f| *f != fiber);
            self.interrupt_lane.push_back(fiber);
        }
    }

    /// Pops the next fiber: interrupt lane first, then FIFO.
    pub fn pop(&mut self) -> Option<FiberId> {
        let fiber = self
            .interrupt_lane
            .pop_front()
            .or_else(|| self.ready_lane.pop_front())?;
        self.scheduled.remove(&fiber);
        Some(fiber)
    }

    /// Pops the next fiber, picking a seeded-random ready fiber when the
    /// interrupt lane is empty.
    pub fn pop_with(&mut self, rng: &mut DetRng) -> Option<FiberId> {
        let fiber = match self.interrupt_lane.pop_front() {
            Some(fiber) => fiber,
            None => {
                let pick = rng.next_usize(self.ready_lane.len());
                self.ready_lane.swap_remove_back(pick)?
            }
        };
        self.scheduled.remove(&fiber);
        Some(fiber)
    }

    /// Drops a fiber from whichever lane holds it.
    pub fn remove(&mut self, fiber: FiberId) {
        if self.scheduled.remove(&fiber) {
            self.interrupt_lane.retain(|f| *f != fiber);
            self.ready_lane.retain(|f| *f != fiber);
        }
    }

    /// Returns true if the fiber is waiting on the interrupt lane.
    #[must_use]
    pub fn is_in_interrupt_lane(&self, fiber: FiberId) -> bool {
        self.interrupt_lane.contains(&fiber)
    }

    /// Clears both lanes.
    pub fn clear(&mut self) {
        self.interrupt_lane.clear();
        self.ready_lane.clear();
        self.scheduled.clear();
    }
}
