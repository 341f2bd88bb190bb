//! Timer heap for sleeping fibers.
//!
//! This module provides a min-heap of timers. Each entry carries the
//! suspension token of the sleeping fiber. A sleep that ends some other way
//! (typically by interruption) is cancelled: its entry is marked dead and
//! dropped lazily, so the top of the heap is always a live timer.

use crate::record::fiber::SuspendToken;
use crate::types::Time;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    token: SuspendToken,
    /// Insertion order; breaks deadline ties FIFO.
    seq: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    /// Tokens with an entry still in `heap` that has not been cancelled.
    live: HashSet<SuspendToken>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Live timers.
    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub(crate) fn insert(&mut self, token: SuspendToken, deadline: Time) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(token);
        self.heap.push(TimerEntry {
            deadline,
            token,
            seq,
        });
    }

    /// Cancels the timer of `token`. Returns `false` if there was none.
    pub(crate) fn cancel(&mut self, token: SuspendToken) -> bool {
        if !self.live.remove(&token) {
            return false;
        }
        self.prune();
        true
    }

    /// Returns the earliest live deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all live timers that have expired (deadline <= now).
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<SuspendToken> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                if self.live.remove(&entry.token) {
                    expired.push(entry.token);
                }
            }
        }
        self.prune();
        expired
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Drops cancelled entries from the top of the heap.
    fn prune(&mut self) {
        while self.heap.peek().is_some_and(|e| !self.live.contains(&e.token)) {
            self.heap.pop();
        }
        // Bound the dead entries buried below the top.
        if self.heap.len() > 64 && self.heap.len() > self.live.len() * 2 {
            let live = &self.live;
            self.heap.retain(|e| live.contains(&e.token));
        }
    }
}
