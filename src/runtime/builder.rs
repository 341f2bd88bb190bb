//! Runtime builder and handles.

use super::config::RuntimeConfig;
use super::shared::{CoreConfig, RuntimeShared};
use super::snapshot::{RuntimeSnapshot, RuntimeStats};
use super::worker::Worker;
use super::FiberHandle;
use crate::effect::Effect;
use crate::error::{ConfigError, Error, ErrorKind};
use crate::fiber_ref::FiberRefs;
use crate::supervisor::Supervisor;
use crate::time::TimeSource;
use crate::tracing_compat::{debug, warn};
use crate::types::{Data, Exit, FiberId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long dropping the last runtime handle waits for fibers to drain.
const DROP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval used while waiting on a fiber, so a concurrent shutdown is
/// noticed.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the number of reductions a fiber performs before yielding.
    #[must_use]
    pub fn step_budget(mut self, budget: u32) -> Self {
        self.config.step_budget = budget;
        self
    }

    /// Use `clock` for sleeps and [`Effect::now`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.config.clock = clock;
        self
    }

    /// Install `supervisor` at startup.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.config.supervisor = supervisor;
        self
    }

    /// Route unobserved defects of root and daemon fibers to `f`.
    #[must_use]
    pub fn defect_reporter<F>(mut self, f: F) -> Self
    where
        F: Fn(FiberId, &crate::types::Cause<crate::types::Dynamic>) + Send + Sync + 'static,
    {
        self.config.defect_reporter = Arc::new(f);
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Apply `FIBRA_*` environment variable overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        super::env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Start from the settings in a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let parsed = super::env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Start from the settings in a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let parsed = super::env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Returns the configuration built so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a runtime from this configuration and start its workers.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config)
    }

    /// Single worker thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// One worker per available CPU.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Threaded runtime created from a [`RuntimeBuilder`].
///
/// Cloning yields another handle to the same runtime. The runtime shuts down
/// when [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        let shared = RuntimeShared::new(
            config.clock.clone(),
            config.supervisor.clone(),
            CoreConfig {
                step_budget: config.step_budget,
                defect_reporter: config.defect_reporter.clone(),
            },
            None,
        );

        let mut workers = Vec::with_capacity(config.worker_threads);
        for id in 0..config.worker_threads {
            match spawn_worker(id, &shared, &config) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.stop();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::new(ErrorKind::WorkerSpawn)
                        .with_message(format!("failed to spawn worker {id}"))
                        .with_source(err));
                }
            }
        }
        debug!(workers = config.worker_threads, step_budget = config.step_budget, "runtime started");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                shared,
                config,
                workers: Mutex::new(workers),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Starts a root fiber running `effect`.
    pub fn spawn<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Result<FiberHandle<A, E>, Error> {
        if self.is_shut_down() {
            return Err(Error::new(ErrorKind::RuntimeShutdown));
        }
        let link = self
            .inner
            .shared
            .spawn(effect.node().clone(), FiberRefs::default(), None, false);
        Ok(FiberHandle::new(link))
    }

    /// Runs `effect` as a root fiber and blocks the calling thread until it
    /// ends.
    pub fn block_on<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Result<Exit<A, E>, Error> {
        let handle = self.spawn(effect)?;
        self.await_exit(&handle)
    }

    /// Blocks the calling thread until the fiber behind `handle` ends.
    pub fn await_exit<A: Data, E: Data>(&self, handle: &FiberHandle<A, E>) -> Result<Exit<A, E>, Error> {
        loop {
            if self
                .inner
                .shared
                .wait_for_exit(handle.link(), Some(EXIT_POLL_INTERVAL))
            {
                return handle
                    .try_exit()
                    .ok_or_else(|| Error::internal("fiber reported done without an exit"));
            }
            if self.inner.shared.lock().stopped {
                return Err(Error::new(ErrorKind::RuntimeShutdown)
                    .with_message(format!("fiber {} did not finish before shutdown", handle.id())));
            }
        }
    }

    /// Like [`await_exit`](Self::await_exit), giving up after `timeout`.
    pub fn await_exit_timeout<A: Data, E: Data>(
        &self,
        handle: &FiberHandle<A, E>,
        timeout: Duration,
    ) -> Option<Exit<A, E>> {
        if self.inner.shared.wait_for_exit(handle.link(), Some(timeout)) {
            handle.try_exit()
        } else {
            None
        }
    }

    /// The fiber's exit, if already published. Never blocks.
    #[must_use]
    pub fn poll_exit<A: Data, E: Data>(&self, handle: &FiberHandle<A, E>) -> Option<Exit<A, E>> {
        handle.try_exit()
    }

    /// Requests interruption of `fiber` on behalf of the runtime. Returns
    /// immediately.
    pub fn interrupt(&self, fiber: FiberId) {
        self.inner.shared.request_interrupt(fiber, FiberId::RUNTIME);
    }

    /// Replaces the installed supervisor.
    pub fn set_supervisor(&self, supervisor: Arc<dyn Supervisor>) {
        self.inner.shared.set_supervisor(supervisor);
    }

    /// Installs `supervisor` alongside the current one.
    pub fn add_supervisor(&self, supervisor: Arc<dyn Supervisor>) {
        self.inner.shared.add_supervisor(supervisor);
    }

    /// Point-in-time view of every live fiber.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let now = self.inner.shared.now();
        self.inner.shared.lock().snapshot(now)
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        self.inner.shared.lock().stats()
    }

    /// True once [`shutdown`](Self::shutdown) has started.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Interrupts every root fiber, waits for all fibers to finish, then
    /// stops and joins the workers. Returns whether every fiber finished.
    ///
    /// Fibers that never reach an interruptible point keep shutdown waiting.
    pub fn shutdown(&self) -> bool {
        self.inner.shutdown(None)
    }

    /// Like [`shutdown`](Self::shutdown), but stops the workers after
    /// `timeout` even if fibers are still running.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        self.inner.shutdown(Some(timeout))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct RuntimeInner {
    shared: Arc<RuntimeShared>,
    config: RuntimeConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RuntimeInner {
    fn shutdown(&self, timeout: Option<Duration>) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return self.shared.lock().live_fibers() == 0;
        }
        let roots = self.shared.interrupt_roots();
        debug!(roots, "runtime shutting down");
        let drained = self.shared.wait_for_quiescence(timeout);
        if !drained {
            let live = self.shared.lock().live_fibers();
            warn!(live, "runtime stopped with fibers still running");
        }
        self.shared.stop();

        let current = std::thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            // A fiber may drop the last handle from a worker thread.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        drained
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown(Some(DROP_DRAIN_TIMEOUT));
    }
}

fn spawn_worker(
    id: usize,
    shared: &Arc<RuntimeShared>,
    config: &RuntimeConfig,
) -> std::io::Result<JoinHandle<()>> {
    let worker = Worker::new(id, Arc::clone(shared));
    let on_start = config.on_thread_start.clone();
    let on_stop = config.on_thread_stop.clone();
    std::thread::Builder::new()
        .name(format!("{}-{id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            if let Some(callback) = on_start.as_ref() {
                callback();
            }
            worker.run_loop();
            if let Some(callback) = on_stop.as_ref() {
                callback();
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn presets_choose_worker_counts() {
        init_test("presets_choose_worker_counts");
        let current = RuntimeBuilder::current_thread().config().worker_threads;
        crate::assert_with_log!(current == 1, "current_thread", 1usize, current);
        let multi = RuntimeBuilder::multi_thread().config().worker_threads;
        crate::assert_with_log!(multi >= 1, "multi_thread", true, multi >= 1);
        crate::test_complete!("presets_choose_worker_counts");
    }

    #[test]
    fn block_on_runs_effect() {
        init_test("block_on_runs_effect");
        let runtime = RuntimeBuilder::current_thread().build().expect("runtime");
        let exit = runtime
            .block_on(Effect::<u32, ()>::succeed(40).map(|x| x + 2))
            .expect("exit");
        crate::assert_with_log!(exit == Exit::Success(42), "exit", 42u32, exit);
        crate::test_complete!("block_on_runs_effect");
    }

    #[test]
    fn thread_hooks_run_per_worker() {
        init_test("thread_hooks_run_per_worker");
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let runtime = RuntimeBuilder::new()
            .worker_threads(3)
            .on_thread_start({
                let started = started.clone();
                move || {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_thread_stop({
                let stopped = stopped.clone();
                move || {
                    stopped.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .expect("runtime");
        assert!(runtime.shutdown());
        let started = started.load(Ordering::SeqCst);
        let stopped = stopped.load(Ordering::SeqCst);
        crate::assert_with_log!(started == 3, "started", 3usize, started);
        crate::assert_with_log!(stopped == 3, "stopped", 3usize, stopped);
        crate::test_complete!("thread_hooks_run_per_worker");
    }

    #[test]
    fn spawn_after_shutdown_is_rejected() {
        init_test("spawn_after_shutdown_is_rejected");
        let runtime = RuntimeBuilder::current_thread().build().expect("runtime");
        runtime.shutdown();
        let err = runtime.spawn(Effect::<(), ()>::unit()).expect_err("shut down");
        let kind = err.kind();
        crate::assert_with_log!(
            kind == ErrorKind::RuntimeShutdown,
            "kind",
            ErrorKind::RuntimeShutdown,
            kind
        );
        crate::test_complete!("spawn_after_shutdown_is_rejected");
    }

    #[test]
    fn shutdown_interrupts_root_fibers() {
        init_test("shutdown_interrupts_root_fibers");
        let runtime = RuntimeBuilder::new().worker_threads(2).build().expect("runtime");
        let handle = runtime.spawn(Effect::<u32, ()>::never()).expect("spawn");
        let drained = runtime.shutdown_timeout(Duration::from_secs(5));
        crate::assert_with_log!(drained, "drained", true, drained);
        let interrupted = runtime.poll_exit(&handle).is_some_and(|e| e.is_interrupted());
        crate::assert_with_log!(interrupted, "interrupted", true, interrupted);
        crate::test_complete!("shutdown_interrupts_root_fibers");
    }
}
