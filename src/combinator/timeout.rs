//! Timeout combinator: bound an effect by a duration.
//!
//! `timeout(effect, d)` is `race_first(effect.map(Some), sleep(d).map(None))`.
//! Whichever side loses is interrupted and its finalizers complete before
//! the timeout returns. A failure of the effect before the deadline is the
//! timeout's failure.
//!
//! # Algebraic Law
//!
//! ```text
//! timeout(timeout(f, d2), d1) ≃ timeout(f, min(d1, d2))   (up to Option nesting)
//! ```

use super::race::race_first;
use crate::effect::Effect;
use crate::types::Data;
use std::time::Duration;

/// `Some(value)` if `effect` succeeds within `duration`, `None` otherwise.
/// Time is read from the runtime's clock.
pub fn timeout<A: Data, E: Data>(effect: Effect<A, E>, duration: Duration) -> Effect<Option<A>, E> {
    race_first(
        effect.map(Some),
        Effect::<(), E>::sleep(duration).map(|()| None),
    )
}
