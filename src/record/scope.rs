//! Finalizer scopes.
//!
//! A scope collects finalizers while it is open. Closing it hands the
//! finalizers back exactly once; the interpreter then runs them in LIFO order,
//! each one seeing the exit that closed the scope.

use crate::effect::node::Finalizer;
use core::fmt;

/// Lifecycle of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Accepting finalizers.
    Open,
    /// Finalizers are running.
    Closing,
    /// All finalizers have run.
    Closed,
}

/// An ordered collection of finalizers bound to a region of a fiber's
/// execution.
pub(crate) struct Scope {
    finalizers: Vec<Finalizer>,
    state: ScopeState,
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self {
            finalizers: Vec::new(),
            state: ScopeState::Open,
        }
    }

    pub(crate) fn state(&self) -> ScopeState {
        self.state
    }

    pub(crate) fn len(&self) -> usize {
        self.finalizers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Registers a finalizer. Returns the finalizer back if the scope is no
    /// longer open; the caller must run it immediately.
    pub(crate) fn add(&mut self, finalizer: Finalizer) -> Result<(), Finalizer> {
        if self.state == ScopeState::Open {
            self.finalizers.push(finalizer);
            Ok(())
        } else {
            Err(finalizer)
        }
    }

    /// Starts closing the scope.
    ///
    /// The returned list is in registration order, so popping from the end
    /// yields LIFO. A second call returns an empty list.
    pub(crate) fn begin_close(&mut self) -> Vec<Finalizer> {
        match self.state {
            ScopeState::Open => {
                self.state = ScopeState::Closing;
                std::mem::take(&mut self.finalizers)
            }
            ScopeState::Closing | ScopeState::Closed => Vec::new(),
        }
    }

    pub(crate) fn finish_close(&mut self) {
        self.state = ScopeState::Closed;
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("finalizers", &self.finalizers.len())
            .field("state", &self.state)
            .finish()
    }
}
