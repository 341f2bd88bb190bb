//! Counting semaphore for fibers.
//!
//! A semaphore controls access to a finite number of permits. A fiber that
//! finds none available suspends until a permit is released to it.
//!
//! # Cancel Safety
//!
//! - `acquire()`: an interrupted waiter is removed from the queue. A permit
//!   handed to a waiter whose suspension was already interrupted is offered
//!   to the next waiter, so interrupted waiters never consume permits.
//! - `with_permit()`: the permit is released however the guarded effect
//!   ends, interruption included.

use crate::effect::{Callback, Canceler, Effect};
use crate::types::Data;
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

/// Hands one permit to a suspended acquirer; `false` if the acquirer has
/// already moved on.
type Grant = Box<dyn FnOnce() -> bool + Send>;

struct SemaphoreState {
    permits: usize,
    waiters: VecDeque<(u64, Grant)>,
    next_key: u64,
}

/// A counting semaphore.
#[derive(Clone)]
pub struct Semaphore {
    state: Arc<Mutex<SemaphoreState>>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl Semaphore {
    /// Creates a semaphore with `permits` available permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SemaphoreState {
                permits,
                waiters: VecDeque::new(),
                next_key: 0,
            })),
        }
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }

    /// Takes one permit, suspending while none is available. Waiters are
    /// served in arrival order.
    pub fn acquire<E: Data>(&self) -> Effect<(), E> {
        let state = self.state.clone();
        Effect::async_callback(move |cb: Callback<(), E>| {
            let mut guard = state.lock();
            if guard.permits > 0 && guard.waiters.is_empty() {
                guard.permits -= 1;
                drop(guard);
                cb.succeed(());
                return None;
            }
            let key = guard.next_key;
            guard.next_key += 1;
            guard.waiters.push_back((key, Box::new(move || cb.succeed(()))));
            drop(guard);

            let state = state.clone();
            Some(Canceler::new(move || {
                state.lock().waiters.retain(|(k, _)| *k != key);
            }))
        })
    }

    /// Returns one permit, handing it straight to the oldest live waiter.
    pub fn release<E: Data>(&self) -> Effect<(), E> {
        let this = self.clone();
        Effect::sync(move || this.release_now())
    }

    /// Runs `effect` holding one permit. The wait for the permit is
    /// interruptible; the release is not.
    pub fn with_permit<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        let this = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            restore
                .apply(this.acquire())
                .zip_right(restore.apply(effect.clone()).ensuring(this.release::<Infallible>()))
        })
    }

    fn release_now(&self) {
        let mut state = self.state.lock();
        loop {
            match state.waiters.pop_front() {
                // The grant resumes a fiber through the runtime's own lock;
                // this lock is always taken first.
                Some((_, grant)) => {
                    if grant() {
                        return;
                    }
                }
                None => {
                    state.permits += 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn acquire_and_release_adjust_permits() {
        init_test("acquire_and_release_adjust_permits");
        let sem = Semaphore::new(2);
        let mut lab = LabRuntime::new(Default::default());
        lab.block_on(sem.acquire::<()>()).expect("progress").unwrap();
        crate::assert_with_log!(sem.available() == 1, "after acquire", 1usize, sem.available());
        lab.block_on(sem.release::<()>()).expect("progress").unwrap();
        crate::assert_with_log!(sem.available() == 2, "after release", 2usize, sem.available());
        crate::test_complete!("acquire_and_release_adjust_permits");
    }

    #[test]
    fn with_permit_bounds_concurrency() {
        init_test("with_permit_bounds_concurrency");
        let sem = Semaphore::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let worker = {
            let running = running.clone();
            let peak = peak.clone();
            let enter = Effect::<(), ()>::sync({
                let running = running.clone();
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                }
            });
            let leave = Effect::<(), ()>::sync(move || {
                running.fetch_sub(1, Ordering::SeqCst);
            });
            sem.with_permit(
                enter
                    .zip_right(Effect::sleep(Duration::from_millis(10)))
                    .zip_right(leave),
            )
        };

        let program = worker
            .fork::<()>()
            .flat_map({
                let worker = worker.clone();
                move |a| {
                    let worker = worker.clone();
                    worker.fork::<()>().flat_map(move |b| {
                        let a = a.clone();
                        worker
                            .fork::<()>()
                            .flat_map(move |c| {
                                let b = b.clone();
                                a.join().zip_right(b.join()).zip_right(c.join())
                            })
                    })
                }
            });

        let mut lab = LabRuntime::new(Default::default());
        lab.block_on(program).expect("progress").unwrap();
        let peak = peak.load(Ordering::SeqCst);
        crate::assert_with_log!(peak == 2, "peak concurrency", 2usize, peak);
        crate::assert_with_log!(sem.available() == 2, "all permits back", 2usize, sem.available());
        crate::test_complete!("with_permit_bounds_concurrency");
    }

    #[test]
    fn interrupted_waiter_consumes_no_permit() {
        init_test("interrupted_waiter_consumes_no_permit");
        let sem = Semaphore::new(0);
        let program = sem.acquire::<()>().fork::<()>().flat_map({
            let sem = sem.clone();
            move |waiter| {
                let sem = sem.clone();
                Effect::<(), ()>::yield_now()
                    .zip_right(waiter.interrupt::<()>())
                    .zip_right(sem.release::<()>())
            }
        });

        let mut lab = LabRuntime::new(Default::default());
        lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(sem.available() == 1, "permit kept", 1usize, sem.available());
        crate::test_complete!("interrupted_waiter_consumes_no_permit");
    }

    #[test]
    fn permit_released_when_guarded_effect_fails() {
        init_test("permit_released_when_guarded_effect_fails");
        let sem = Semaphore::new(1);
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab
            .block_on(sem.with_permit(Effect::<(), &'static str>::fail("nope")))
            .expect("progress");
        crate::assert_with_log!(exit.is_failure(), "guarded failure", true, exit.is_failure());
        crate::assert_with_log!(sem.available() == 1, "permit back", 1usize, sem.available());
        crate::test_complete!("permit_released_when_guarded_effect_fails");
    }

    #[test]
    fn permit_granted_to_a_waiter_survives_its_interruption() {
        init_test("permit_granted_to_a_waiter_survives_its_interruption");
        let sem = Semaphore::new(1);
        let mut lab = LabRuntime::new(Default::default());
        lab.block_on(sem.acquire::<()>()).expect("progress").unwrap();
        let waiter = lab.spawn(sem.with_permit(Effect::<(), ()>::unit()));
        lab.run_until_quiescent().expect("within limit");
        crate::assert_with_log!(!waiter.is_done(), "waiter parked", false, waiter.is_done());

        // The release hands the permit over; the interrupt lands before the
        // waiter gets a turn.
        let program = sem.release::<()>().zip_right(waiter.interrupt::<()>());
        let exit = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(exit.is_interrupted(), "waiter interrupted", true, exit);
        crate::assert_with_log!(sem.available() == 1, "permit returned", 1usize, sem.available());
        crate::test_complete!("permit_granted_to_a_waiter_survives_its_interruption");
    }
}
