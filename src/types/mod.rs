//! Core value types: identifiers, time, [`Cause`] and [`Exit`].

pub mod cause;
pub mod exit;
pub mod id;
pub mod value;

pub use cause::{Cause, DefectPayload};
pub use exit::{DynExit, Exit};
pub use id::{FiberId, FiberRefId, Time};
pub use value::{Data, Dynamic};
