//! Time sources.

mod clock;

pub use clock::{TimeSource, VirtualClock, WallClock};
