//! Runtime state and scheduling.
//!
//! This module contains the core runtime machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and the threaded [`Runtime`]
//! - [`env_config`]: `FIBRA_*` environment overrides and TOML files
//! - `state`: Global runtime state (fiber arena, ready queue, timers)
//! - `shared`: State lock, clock, supervisor and wake-up condition variables
//! - `interpreter`: The trampoline that reduces one fiber's description
//! - [`scheduler`]: Two-lane ready queue
//! - `timer`: Timer heap for sleeping fibers
//! - `worker`: Worker thread loop
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder.
//!
//! ## Quick Start
//!
//! ```
//! use fibra::runtime::RuntimeBuilder;
//! use fibra::{Effect, Exit};
//!
//! let runtime = RuntimeBuilder::current_thread().build()?;
//! let exit = runtime.block_on(Effect::<u32, ()>::succeed(1).map(|x| x + 1))?;
//! assert_eq!(exit, Exit::Success(2));
//! # Ok::<(), fibra::Error>(())
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use fibra::runtime::RuntimeBuilder;
//!
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Configuration Reference (Defaults + Notes)
//!
//! - `worker_threads`: default = available parallelism (min 1).
//! - `thread_stack_size`: default = 2 MiB. Deep non-tail recursion in user
//!   thunks is what consumes it; the interpreter itself does not recurse.
//! - `thread_name_prefix`: default = `fibra-worker`. Improves diagnostics.
//! - `step_budget`: default = 128. Lower for fairness, higher for throughput.
//! - `on_thread_start/stop`: lifecycle hooks; keep work minimal to avoid jitter.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod fiber_handle;
pub(crate) mod interpreter;
pub mod scheduler;
pub(crate) mod shared;
pub mod snapshot;
pub(crate) mod state;
pub(crate) mod timer;
pub(crate) mod worker;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{DefectReporter, RuntimeConfig};
pub use fiber_handle::FiberHandle;
pub use scheduler::Scheduler;
pub use snapshot::{FiberSnapshot, RuntimeSnapshot, RuntimeStats};
