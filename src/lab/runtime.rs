//! Lab runtime for deterministic execution.
//!
//! The lab runtime drives the same core as the threaded [`Runtime`] but on
//! the calling thread:
//! - Virtual time (controlled advancement, no real sleeping)
//! - Deterministic scheduling (FIFO, or seed-driven when randomized)
//! - Trace capture of every lifecycle event
//!
//! [`Runtime`]: crate::runtime::Runtime

use super::config::LabConfig;
use crate::effect::Effect;
use crate::error::{Error, ErrorKind};
use crate::fiber_ref::FiberRefs;
use crate::runtime::config::default_defect_reporter;
use crate::runtime::shared::{CoreConfig, RuntimeShared};
use crate::runtime::{FiberHandle, RuntimeSnapshot, RuntimeStats};
use crate::supervisor::{self, Supervisor};
use crate::time::{TimeSource, VirtualClock};
use crate::trace::{TraceBufferHandle, TraceEvent, TraceSupervisor};
use crate::tracing_compat::debug;
use crate::types::{Data, Exit, FiberId, Time};
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A violation found by [`LabRuntime::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Fibers are still registered although nothing can make progress: no
    /// fiber is ready and no timer is pending.
    FiberLeak {
        /// Number of stuck fibers.
        count: usize,
    },
    /// The parent/child graph is inconsistent.
    Supervision(String),
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FiberLeak { count } => write!(f, "{count} fiber(s) can never make progress"),
            Self::Supervision(msg) => write!(f, "supervision: {msg}"),
        }
    }
}

/// The deterministic lab runtime.
///
/// Nothing runs until the runtime is driven with [`step`](Self::step),
/// [`run_until_quiescent`](Self::run_until_quiescent), [`run`](Self::run)
/// or [`block_on`](Self::block_on).
pub struct LabRuntime {
    shared: Arc<RuntimeShared>,
    clock: Arc<VirtualClock>,
    trace: TraceSupervisor,
    config: LabConfig,
    steps: u64,
}

impl LabRuntime {
    /// Creates a new lab runtime with the given configuration.
    #[must_use]
    pub fn new(config: LabConfig) -> Self {
        let clock = Arc::new(VirtualClock::new());
        let trace = TraceSupervisor::new(config.trace_capacity, clock.clone())
            .with_effects(config.trace_effects);
        let rng = config.randomize_schedule.then(|| config.rng());
        let shared = RuntimeShared::new(
            clock.clone(),
            Arc::new(trace.clone()),
            CoreConfig {
                step_budget: config.step_budget.max(1),
                defect_reporter: default_defect_reporter(),
            },
            rng,
        );
        debug!(seed = config.seed, randomized = config.randomize_schedule, "lab runtime created");
        Self {
            shared,
            clock,
            trace,
            config,
            steps: 0,
        }
    }

    /// Creates a lab runtime with the given seed and default settings.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(LabConfig::new(seed))
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Returns the number of steps executed.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Returns the recorded trace, oldest first.
    #[must_use]
    pub fn trace(&self) -> Vec<TraceEvent> {
        self.trace.events()
    }

    /// Returns the shared trace buffer.
    #[must_use]
    pub fn trace_buffer(&self) -> &TraceBufferHandle {
        self.trace.buffer()
    }

    /// Returns true once every fiber has published its exit.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.shared.lock().live_fibers() == 0
    }

    /// Number of fibers that have not yet published their exit.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.shared.lock().live_fibers()
    }

    /// Starts a root fiber running `effect`. It runs once the lab is driven.
    pub fn spawn<A: Data, E: Data>(&mut self, effect: Effect<A, E>) -> FiberHandle<A, E> {
        let link = self
            .shared
            .spawn(effect.node().clone(), FiberRefs::default(), None, false);
        FiberHandle::new(link)
    }

    /// Requests interruption of `fiber` on behalf of the runtime.
    pub fn interrupt(&mut self, fiber: FiberId) {
        self.shared.request_interrupt(fiber, FiberId::RUNTIME);
    }

    /// Advances virtual time and wakes the sleepers that became due.
    /// Returns how many were woken.
    pub fn advance_time(&mut self, by: Duration) -> usize {
        self.clock.advance(by);
        self.fire_timers()
    }

    /// Advances time to `time` if it lies in the future.
    pub fn advance_time_to(&mut self, time: Time) -> usize {
        self.clock.advance_to(time);
        self.fire_timers()
    }

    /// Runs one turn of the next ready fiber. Returns `false` if no fiber
    /// was ready.
    pub fn step(&mut self) -> bool {
        self.fire_timers();
        let next = self.shared.lock().pop_ready();
        let Some(id) = next else {
            return false;
        };
        self.steps += 1;
        self.shared.run_fiber(id);
        true
    }

    /// Runs until no fiber is ready at the current virtual time.
    ///
    /// Returns the number of steps executed, or
    /// [`ErrorKind::StepLimitExceeded`] once the configured step limit is
    /// reached.
    pub fn run_until_quiescent(&mut self) -> Result<u64, Error> {
        let start_steps = self.steps;
        loop {
            if let Some(max) = self.config.max_steps {
                if self.steps >= max {
                    return Err(Error::new(ErrorKind::StepLimitExceeded)
                        .with_message(format!("lab stopped after {max} steps")));
                }
            }
            if !self.step() {
                return Ok(self.steps - start_steps);
            }
        }
    }

    /// Runs until no fiber is ready and no timer is pending, jumping virtual
    /// time to each next deadline.
    pub fn run(&mut self) -> Result<u64, Error> {
        let start_steps = self.steps;
        loop {
            self.run_until_quiescent()?;
            let next = self.shared.lock().next_deadline();
            match next {
                Some(deadline) => {
                    self.advance_time_to(deadline);
                }
                None => return Ok(self.steps - start_steps),
            }
        }
    }

    /// Runs `effect` as a root fiber until it ends, advancing virtual time
    /// whenever everything is asleep.
    ///
    /// Returns [`ErrorKind::Stalled`] when the fiber is still running but
    /// nothing is ready and no timer is pending.
    pub fn block_on<A: Data, E: Data>(&mut self, effect: Effect<A, E>) -> Result<Exit<A, E>, Error> {
        let handle = self.spawn(effect);
        loop {
            self.run_until_quiescent()?;
            if let Some(exit) = handle.try_exit() {
                return Ok(exit);
            }
            let next = self.shared.lock().next_deadline();
            match next {
                Some(deadline) => {
                    self.advance_time_to(deadline);
                }
                None => {
                    return Err(Error::new(ErrorKind::Stalled).with_message(format!(
                        "fiber {} cannot make progress",
                        handle.id()
                    )))
                }
            }
        }
    }

    /// Replaces the installed supervisor. The trace recorder stays installed.
    pub fn set_supervisor(&mut self, supervisor: Arc<dyn Supervisor>) {
        self.shared
            .set_supervisor(supervisor::compose(Arc::new(self.trace.clone()), supervisor));
    }

    /// Installs `supervisor` alongside the current ones.
    pub fn add_supervisor(&mut self, supervisor: Arc<dyn Supervisor>) {
        self.shared.add_supervisor(supervisor);
    }

    /// Point-in-time view of every live fiber.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let now = self.now();
        self.shared.lock().snapshot(now)
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        self.shared.lock().stats()
    }

    /// Checks the fiber graph and reports fibers that can never finish.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let state = self.shared.lock();
        let mut violations: Vec<InvariantViolation> = state
            .check_invariants()
            .into_iter()
            .map(InvariantViolation::Supervision)
            .collect();
        let live = state.live_fibers();
        if live > 0 && !state.has_ready() && state.next_deadline().is_none() {
            violations.push(InvariantViolation::FiberLeak { count: live });
        }
        violations
    }

    fn fire_timers(&mut self) -> usize {
        let now = self.clock.now();
        self.shared.lock().fire_timers(now)
    }
}

impl fmt::Debug for LabRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabRuntime")
            .field("seed", &self.config.seed)
            .field("now", &self.now())
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl Drop for LabRuntime {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Deferred;
    use crate::test_utils::init_test_logging;
    use crate::trace::TraceEventKind;
    use parking_lot::Mutex;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn block_on_returns_exit() {
        init_test("block_on_returns_exit");
        let mut lab = LabRuntime::new(LabConfig::default());
        let exit = lab.block_on(Effect::<u32, ()>::succeed(20).map(|x| x + 1)).expect("progress");
        crate::assert_with_log!(exit == Exit::Success(21), "exit", 21u32, exit);
        crate::assert_with_log!(lab.is_quiescent(), "quiescent", true, lab.is_quiescent());
        crate::test_complete!("block_on_returns_exit");
    }

    #[test]
    fn sleeps_advance_virtual_time() {
        init_test("sleeps_advance_virtual_time");
        let mut lab = LabRuntime::new(LabConfig::default());
        let program = Effect::<(), ()>::sleep(Duration::from_secs(3600)).zip_right(Effect::<Time, ()>::now());
        let woke_at = lab.block_on(program).expect("progress").unwrap();
        let expected = Time::from_millis(3_600_000);
        crate::assert_with_log!(woke_at == expected, "virtual wake time", expected, woke_at);
        crate::test_complete!("sleeps_advance_virtual_time");
    }

    #[test]
    fn stalled_program_is_reported() {
        init_test("stalled_program_is_reported");
        let mut lab = LabRuntime::new(LabConfig::default());
        let err = lab.block_on(Effect::<u32, ()>::never()).expect_err("stalls");
        crate::assert_with_log!(err.is_stalled(), "stalled", true, err.is_stalled());
        let violations = lab.check_invariants();
        let leaked = violations.contains(&InvariantViolation::FiberLeak { count: 1 });
        crate::assert_with_log!(leaked, "leak reported", true, violations);
        crate::test_complete!("stalled_program_is_reported");
    }

    #[test]
    fn step_limit_stops_runaway_program() {
        init_test("step_limit_stops_runaway_program");
        let mut lab = LabRuntime::new(LabConfig::default().max_steps(50).step_budget(1));
        let err = lab.block_on(Effect::<(), ()>::yield_now().forever()).expect_err("limit");
        let kind = err.kind();
        crate::assert_with_log!(
            kind == ErrorKind::StepLimitExceeded,
            "kind",
            ErrorKind::StepLimitExceeded,
            kind
        );
        crate::test_complete!("step_limit_stops_runaway_program");
    }

    #[test]
    fn manual_stepping_and_time() {
        init_test("manual_stepping_and_time");
        let mut lab = LabRuntime::new(LabConfig::default());
        let handle = lab.spawn(Effect::<(), ()>::sleep(Duration::from_millis(10)).map(|()| 5u8));
        lab.run_until_quiescent().expect("within limit");
        crate::assert_with_log!(!handle.is_done(), "still asleep", false, handle.is_done());
        let woken = lab.advance_time(Duration::from_millis(10));
        crate::assert_with_log!(woken == 1, "one sleeper woken", 1usize, woken);
        lab.run_until_quiescent().expect("within limit");
        let exit = handle.try_exit();
        crate::assert_with_log!(exit == Some(Exit::Success(5)), "done", Some(5u8), exit);
        crate::test_complete!("manual_stepping_and_time");
    }

    #[test]
    fn external_interrupt_is_attributed_to_runtime() {
        init_test("external_interrupt_is_attributed_to_runtime");
        let mut lab = LabRuntime::new(LabConfig::default());
        let handle = lab.spawn(Effect::<u32, ()>::never());
        lab.run_until_quiescent().expect("within limit");
        lab.interrupt(handle.id());
        lab.run().expect("within limit");
        let interruptors = handle
            .try_exit()
            .and_then(|e| e.cause().map(|c| c.interruptors()))
            .unwrap_or_default();
        let by_runtime = interruptors.contains(&FiberId::RUNTIME);
        crate::assert_with_log!(by_runtime, "runtime interruptor", true, interruptors);
        crate::assert_with_log!(lab.is_quiescent(), "quiescent", true, lab.is_quiescent());
        crate::test_complete!("external_interrupt_is_attributed_to_runtime");
    }

    #[test]
    fn trace_records_lifecycle() {
        init_test("trace_records_lifecycle");
        let mut lab = LabRuntime::new(LabConfig::default());
        let program = Effect::<u8, ()>::succeed(1)
            .fork::<()>()
            .flat_map(|child| child.join());
        lab.block_on(program).expect("progress").unwrap();
        let trace = lab.trace();
        let starts = trace.iter().filter(|e| e.kind == TraceEventKind::Start).count();
        let ends = trace.iter().filter(|e| e.kind == TraceEventKind::End).count();
        crate::assert_with_log!(starts == 2, "starts", 2usize, starts);
        crate::assert_with_log!(ends == 2, "ends", 2usize, ends);
        let seqs: Vec<u64> = trace.iter().map(|e| e.seq).collect();
        let ordered = seqs.windows(2).all(|w| w[0] < w[1]);
        crate::assert_with_log!(ordered, "monotonic seq", true, seqs);
        crate::assert_with_log!(
            lab.check_invariants().is_empty(),
            "clean graph",
            true,
            lab.check_invariants()
        );
        crate::test_complete!("trace_records_lifecycle");
    }

    fn completion_order(seed: u64) -> Vec<u32> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Deferred::<(), ()>::new();
        let mut lab = LabRuntime::new(LabConfig::new(seed).randomize_schedule(true));
        for i in 0..8u32 {
            let order = order.clone();
            let body = gate
                .wait()
                .zip_right(Effect::<(), ()>::yield_now())
                .zip_right(Effect::sync(move || order.lock().push(i)));
            lab.spawn(body);
        }
        lab.run_until_quiescent().expect("within limit");
        let _ = gate.try_complete(Exit::Success(()));
        lab.run().expect("within limit");
        let result = order.lock().clone();
        result
    }

    #[test]
    fn same_seed_same_schedule() {
        init_test("same_seed_same_schedule");
        let first = completion_order(9);
        let second = completion_order(9);
        crate::assert_with_log!(first.len() == 8, "all ran", 8usize, first.len());
        crate::assert_with_log!(first == second, "replayable", first, second);
        crate::test_complete!("same_seed_same_schedule");
    }
}
