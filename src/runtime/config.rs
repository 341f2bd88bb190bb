//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"fibra-worker"` |
//! | `step_budget` | 128 |
//! | `clock` | [`WallClock`] |
//! | `supervisor` | [`NoopSupervisor`] |
//! | `defect_reporter` | `tracing` error event |

use crate::supervisor::{NoopSupervisor, Supervisor};
use crate::time::{TimeSource, WallClock};
use crate::tracing_compat::error;
use crate::types::{Cause, Dynamic, FiberId};
use std::sync::Arc;

/// Called with the final cause of a root or daemon fiber that ended with a
/// defect. Nobody else observes such a cause.
pub type DefectReporter = Arc<dyn Fn(FiberId, &Cause<Dynamic>) + Send + Sync>;

/// Default thread stack size.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default number of reductions a fiber performs before yielding.
pub const DEFAULT_STEP_BUDGET: u32 = 128;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "fibra-worker";

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Reductions a fiber performs before it yields to the ready queue.
    pub step_budget: u32,
    /// Time source for sleeps and [`Effect::now`](crate::Effect::now).
    pub clock: Arc<dyn TimeSource>,
    /// Lifecycle observer installed at startup.
    pub supervisor: Arc<dyn Supervisor>,
    /// Receives unobserved defects.
    pub defect_reporter: DefectReporter,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.step_budget == 0 {
            self.step_budget = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            step_budget: DEFAULT_STEP_BUDGET,
            clock: Arc::new(WallClock::new()),
            supervisor: Arc::new(NoopSupervisor),
            defect_reporter: default_defect_reporter(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("step_budget", &self.step_budget)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish_non_exhaustive()
    }
}

/// Logs the defect at `error` level.
#[must_use]
pub fn default_defect_reporter() -> DefectReporter {
    Arc::new(|fiber: FiberId, cause: &Cause<Dynamic>| {
        let defects: Vec<&str> = cause.defects().iter().map(|d| d.message()).collect();
        error!(fiber = %fiber, defects = ?defects, "fiber ended with an unhandled defect");
    })
}
