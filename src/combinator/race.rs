//! Race combinators: run two effects on child fibers, keep one outcome.
//!
//! Both sides are forked as children of the racing fiber. When the race is
//! settled the loser is interrupted and awaited, so its finalizers have
//! completed before the race itself returns:
//!
//! ```text
//! race(a, b):
//!   fa <- fork(a)
//!   fb <- fork(b)
//!   i  <- wait until settled
//!   interrupt(loser); await(loser)
//!   join(winner)
//! ```
//!
//! [`race`] is settled by the first success; if both sides fail the causes
//! are combined with `Both`. [`race_first`] is settled by the first exit of
//! either kind.
//!
//! # Algebraic Laws
//!
//! - Identity: `race(a, never) ≃ a`
//! - Commutativity: `race(a, b) ≃ race(b, a)` up to which side wins a tie

use crate::effect::Effect;
use crate::runtime::FiberHandle;
use crate::sync::Deferred;
use crate::types::{Cause, Data, Exit};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;

/// What settles a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    FirstSuccess,
    FirstExit,
}

/// Runs both effects concurrently. The first to succeed wins and the other
/// is interrupted. If both fail, the race fails with both causes.
pub fn race<A: Data, E: Data>(left: Effect<A, E>, right: Effect<A, E>) -> Effect<A, E> {
    race_with(left, right, Settle::FirstSuccess)
}

/// Runs both effects concurrently. Whichever ends first, successfully or
/// not, decides the outcome; the other is interrupted.
pub fn race_first<A: Data, E: Data>(left: Effect<A, E>, right: Effect<A, E>) -> Effect<A, E> {
    race_with(left, right, Settle::FirstExit)
}

fn race_with<A: Data, E: Data>(left: Effect<A, E>, right: Effect<A, E>, settle: Settle) -> Effect<A, E> {
    // Fresh settlement state for every run of the description.
    Effect::suspend(move || {
        let settled = Deferred::<usize, E>::new();
        let failed = Arc::new(Mutex::new(None));
        let left = left.on_exit(reporter(0, settle, settled.clone(), failed.clone()));
        let right = right.on_exit(reporter(1, settle, settled.clone(), failed));

        Effect::uninterruptible_mask(move |restore| {
            let right = right.clone();
            let settled = settled.clone();
            left.fork::<E>().flat_map(move |l: FiberHandle<A, E>| {
                let settled = settled.clone();
                right.fork::<E>().flat_map(move |r: FiberHandle<A, E>| {
                    let (l2, r2) = (l.clone(), r.clone());
                    let (l, r) = (l.clone(), r.clone());
                    restore
                        .apply(settled.wait())
                        .on_exit(move |exit: &Exit<usize, E>| {
                            if exit.is_interrupted() {
                                drain(&l2, &r2)
                            } else {
                                Effect::unit()
                            }
                        })
                        .flat_map(move |winner| {
                            let (winner, loser) = if winner == 0 {
                                (l.clone(), r.clone())
                            } else {
                                (r.clone(), l.clone())
                            };
                            loser.interrupt::<E>().zip_right(winner.join())
                        })
                })
            })
        })
    })
}

/// Builds the exit hook of one side: settles the race when this side's exit
/// decides it.
fn reporter<A: Data, E: Data>(
    index: usize,
    settle: Settle,
    settled: Deferred<usize, E>,
    failed: Arc<Mutex<Option<Cause<E>>>>,
) -> impl Fn(&Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static {
    move |exit: &Exit<A, E>| {
        let outcome = match (settle, exit) {
            (Settle::FirstExit, _) | (Settle::FirstSuccess, Exit::Success(_)) => {
                Some(Exit::Success(index))
            }
            (Settle::FirstSuccess, Exit::Failure(cause)) => {
                let mut slot = failed.lock();
                match slot.take() {
                    Some(first) => Some(Exit::Failure(first.both(cause.clone()))),
                    None => {
                        *slot = Some(cause.clone());
                        None
                    }
                }
            }
        };
        match outcome {
            Some(exit) => settled.complete::<Infallible>(exit).map(|_| ()),
            None => Effect::unit(),
        }
    }
}

/// Interrupts both sides, then waits for both.
fn drain<A: Data, E: Data>(l: &FiberHandle<A, E>, r: &FiberHandle<A, E>) -> Effect<(), Infallible> {
    let (l_wait, r_wait) = (l.clone(), r.clone());
    l.interrupt_fork::<Infallible>()
        .zip_right(r.interrupt_fork())
        .zip_right(l_wait.await_exit())
        .zip_right(r_wait.await_exit())
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn slow<E: Data>(value: u32, flag: &Arc<AtomicBool>) -> Effect<u32, E> {
        let flag = flag.clone();
        Effect::<(), E>::sleep(Duration::from_secs(10))
            .map(move |()| value)
            .ensuring(Effect::sync(move || flag.store(true, Ordering::SeqCst)))
    }

    #[test]
    fn loser_finalizers_run_before_race_returns() {
        init_test("loser_finalizers_run_before_race_returns");
        let released = Arc::new(AtomicBool::new(false));
        let observed = released.clone();
        let program = race(Effect::<u32, ()>::succeed(1), slow(2, &released))
            .flat_map(move |v| {
                let observed = observed.clone();
                Effect::sync(move || (v, observed.load(Ordering::SeqCst)))
            });

        let mut lab = LabRuntime::new(Default::default());
        let (value, released) = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(value == 1, "winner value", 1u32, value);
        crate::assert_with_log!(released, "loser finalized", true, released);
        crate::test_complete!("loser_finalizers_run_before_race_returns");
    }

    #[test]
    fn first_failure_does_not_settle_race() {
        init_test("first_failure_does_not_settle_race");
        let program = race(
            Effect::<u32, &'static str>::fail("early"),
            Effect::<(), &'static str>::sleep(Duration::from_millis(5)).map(|()| 7),
        );
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab.block_on(program).expect("progress");
        crate::assert_with_log!(exit == Exit::Success(7), "late success wins", 7u32, exit);
        crate::test_complete!("first_failure_does_not_settle_race");
    }

    #[test]
    fn both_failures_are_combined() {
        init_test("both_failures_are_combined");
        let program = race(
            Effect::<u32, &'static str>::fail("a"),
            Effect::<u32, &'static str>::fail("b"),
        );
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab.block_on(program).expect("progress");
        let mut failures: Vec<&str> = exit
            .cause()
            .map(|c| c.failures().into_iter().copied().collect())
            .unwrap_or_default();
        failures.sort_unstable();
        crate::assert_with_log!(failures == ["a", "b"], "both causes", ["a", "b"], failures);
        crate::test_complete!("both_failures_are_combined");
    }

    #[test]
    fn race_first_settles_on_failure() {
        init_test("race_first_settles_on_failure");
        let released = Arc::new(AtomicBool::new(false));
        let program = race_first(Effect::<u32, &'static str>::fail("fast"), slow(1, &released));
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab.block_on(program).expect("progress");
        crate::assert_with_log!(exit == Exit::fail("fast"), "failure wins", "fast", exit);
        let released = released.load(Ordering::SeqCst);
        crate::assert_with_log!(released, "loser finalized", true, released);
        crate::test_complete!("race_first_settles_on_failure");
    }

    #[test]
    fn race_with_never_is_identity() {
        init_test("race_with_never_is_identity");
        let program = race(Effect::<u32, ()>::never(), Effect::succeed(3));
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab.block_on(program).expect("progress");
        crate::assert_with_log!(exit == Exit::Success(3), "never loses", 3u32, exit);
        crate::test_complete!("race_with_never_is_identity");
    }
}
