//! Configuration for the lab runtime.
//!
//! The lab configuration controls deterministic execution:
//! - Random seed for schedule randomization
//! - Trace buffer size
//! - Step limit guarding against runaway programs

use crate::runtime::config::DEFAULT_STEP_BUDGET;
use crate::util::DetRng;

/// Configuration for the lab runtime.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Random seed for deterministic scheduling.
    pub seed: u64,
    /// Trace buffer capacity.
    pub trace_capacity: usize,
    /// Maximum number of steps before forced termination.
    pub max_steps: Option<u64>,
    /// Pick the next ready fiber at random (seeded) instead of FIFO.
    pub randomize_schedule: bool,
    /// Whether effect reductions are recorded in the trace.
    pub trace_effects: bool,
    /// Reductions a fiber performs before it yields.
    pub step_budget: u32,
}

impl LabConfig {
    /// Creates a new lab configuration with the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            trace_capacity: 4096,
            max_steps: Some(100_000),
            randomize_schedule: false,
            trace_effects: false,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    /// Sets the trace buffer capacity.
    #[must_use]
    pub const fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Sets the maximum number of steps.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Removes the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Enables seeded schedule randomization.
    #[must_use]
    pub const fn randomize_schedule(mut self, value: bool) -> Self {
        self.randomize_schedule = value;
        self
    }

    /// Records every reduction in the trace, not only lifecycle events.
    #[must_use]
    pub const fn trace_effects(mut self, value: bool) -> Self {
        self.trace_effects = value;
        self
    }

    /// Sets the per-turn reduction budget. Zero is treated as one.
    #[must_use]
    pub const fn step_budget(mut self, budget: u32) -> Self {
        self.step_budget = if budget == 0 { 1 } else { budget };
        self
    }

    /// Creates a deterministic RNG from this configuration.
    #[must_use]
    pub fn rng(&self) -> DetRng {
        DetRng::new(self.seed)
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new(42)
    }
}
