//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `FIBRA_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FIBRA_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `FIBRA_STEP_BUDGET` | `u32` | `step_budget` |
//! | `FIBRA_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FIBRA_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::error::ConfigError;
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "FIBRA_WORKER_THREADS";
/// Environment variable name for the per-turn reduction budget.
pub const ENV_STEP_BUDGET: &str = "FIBRA_STEP_BUDGET";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "FIBRA_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FIBRA_THREAD_NAME_PREFIX";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_STEP_BUDGET) {
        config.step_budget = parse_u32(ENV_STEP_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var_name, "unsigned integer", val))
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32, ConfigError> {
    val.trim()
        .parse::<u32>()
        .map_err(|_| invalid(var_name, "u32", val))
}

fn invalid(var_name: &str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var_name.to_string(),
        expected,
        value: val.to_string(),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [runtime]
/// worker_threads = 4
/// step_budget = 128
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Runtime settings.
    #[serde(default)]
    pub runtime: RuntimeToml,
}

/// Runtime section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Reductions per fiber turn.
    pub step_budget: Option<u32>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.runtime.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.runtime.step_budget {
        config.step_budget = v;
    }
    if let Some(v) = toml.runtime.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.runtime.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Toml(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}
