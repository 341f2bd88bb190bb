//! Logging facade.
//!
//! With the `tracing-integration` feature (on by default) this re-exports the
//! `tracing` macros. Without it the same names expand to nothing, so runtime
//! code logs through `crate::tracing_compat::{debug, trace, ...}` and never
//! needs its own `cfg` attributes.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op `trace!`.
    #[macro_export]
    macro_rules! __fibra_trace {
        ($($arg:tt)*) => {};
    }

    /// No-op `debug!`.
    #[macro_export]
    macro_rules! __fibra_debug {
        ($($arg:tt)*) => {};
    }

    /// No-op `info!`.
    #[macro_export]
    macro_rules! __fibra_info {
        ($($arg:tt)*) => {};
    }

    /// No-op `warn!`.
    #[macro_export]
    macro_rules! __fibra_warn {
        ($($arg:tt)*) => {};
    }

    /// No-op `error!`.
    #[macro_export]
    macro_rules! __fibra_error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{
        __fibra_debug as debug, __fibra_error as error, __fibra_info as info,
        __fibra_trace as trace, __fibra_warn as warn,
    };
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
