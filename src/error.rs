//! Runtime-level errors.
//!
//! Failures of the computations a runtime executes never show up here: those
//! travel inside [`Cause`](crate::types::Cause) and are observed through an
//! [`Exit`](crate::types::Exit). This module covers the runtime itself:
//!
//! - **Lifecycle**: the runtime was shut down, a worker thread failed to start
//! - **Lab**: a deterministic run stalled or ran out of steps
//! - **Config**: invalid builder, environment or TOML settings
//! - **Internal**: broken runtime invariants

use core::fmt;
use std::sync::Arc;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The runtime no longer accepts work.
    RuntimeShutdown,
    /// A worker thread could not be spawned.
    WorkerSpawn,
    /// No fiber can make progress and the awaited exit is not available.
    Stalled,
    /// The lab's step limit was reached.
    StepLimitExceeded,
    /// A configuration value was rejected.
    InvalidConfig,
    /// A runtime invariant was violated (bug).
    Internal,
}

/// Coarse grouping of [`ErrorKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Runtime construction and shutdown.
    Lifecycle,
    /// Deterministic lab execution.
    Lab,
    /// Configuration.
    Config,
    /// Runtime bugs.
    Internal,
}

impl ErrorKind {
    /// The category this kind belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::RuntimeShutdown | Self::WorkerSpawn => ErrorCategory::Lifecycle,
            Self::Stalled | Self::StepLimitExceeded => ErrorCategory::Lab,
            Self::InvalidConfig => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// Runtime error with an optional message and source.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches an underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// True for [`ErrorKind::Stalled`].
    #[must_use]
    pub const fn is_stalled(&self) -> bool {
        matches!(self.kind, ErrorKind::Stalled)
    }

    /// Shorthand for an internal error.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Errors raised while assembling a [`RuntimeConfig`](crate::runtime::RuntimeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// What was expected.
        expected: &'static str,
        /// The raw value.
        value: String,
    },
    /// A setting is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The TOML document could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Toml(String),
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;
