//! Bounded FIFO queue for fibers.
//!
//! `offer` suspends while the queue is full and `take` suspends while it is
//! empty. A capacity of zero makes every hand-off a rendezvous: an offer
//! completes only when a taker receives the item.
//!
//! # Cancel Safety
//!
//! - `take()`: an interrupted taker is removed and receives nothing; an item
//!   handed to a taker that already moved on stays in the queue. An item
//!   accepted by the taker's callback reaches its continuation even when an
//!   interrupt arrives before its next turn.
//! - `offer()`: an interrupted offerer is removed together with its item,
//!   so the item is never delivered.

use crate::effect::{Callback, Canceler, Effect};
use crate::types::Data;
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Delivers an item to a suspended taker; gives it back if the taker has
/// already moved on.
type Taker<A> = Box<dyn FnOnce(A) -> Result<(), A> + Send>;

/// Tells a suspended offerer its item was accepted; `false` if the offerer
/// has already moved on.
type Accept = Box<dyn FnOnce() -> bool + Send>;

struct Offerer<A> {
    key: u64,
    item: A,
    accept: Accept,
}

struct QueueState<A> {
    items: VecDeque<A>,
    capacity: usize,
    takers: VecDeque<(u64, Taker<A>)>,
    offerers: VecDeque<Offerer<A>>,
    next_key: u64,
}

impl<A> QueueState<A> {
    fn key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// Hands `item` to the oldest live taker.
    fn deliver(&mut self, mut item: A) -> Result<(), A> {
        while let Some((_, taker)) = self.takers.pop_front() {
            match taker(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
        }
        Err(item)
    }

    /// Takes the next item offered by a suspended offerer.
    fn accept_offer(&mut self) -> Option<A> {
        while let Some(offerer) = self.offerers.pop_front() {
            if (offerer.accept)() {
                return Some(offerer.item);
            }
        }
        None
    }

    /// Moves items from suspended offerers into free slots.
    fn refill(&mut self) {
        while self.items.len() < self.capacity {
            match self.accept_offer() {
                Some(item) => self.items.push_back(item),
                None => break,
            }
        }
    }

    fn try_take(&mut self) -> Option<A> {
        match self.items.pop_front() {
            Some(item) => {
                self.refill();
                Some(item)
            }
            None => self.accept_offer(),
        }
    }

    fn try_offer(&mut self, item: A) -> Result<(), A> {
        let item = match self.deliver(item) {
            Ok(()) => return Ok(()),
            Err(item) => item,
        };
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }
}

/// A bounded multi-producer, multi-consumer queue.
///
/// Callbacks are completed while the queue's lock is held; the runtime's lock
/// is only ever taken after it.
pub struct Queue<A> {
    state: Arc<Mutex<QueueState<A>>>,
}

impl<A> Clone for Queue<A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<A> fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("size", &state.items.len())
            .field("capacity", &state.capacity)
            .field("takers", &state.takers.len())
            .field("offerers", &state.offerers.len())
            .finish()
    }
}

impl<A: Data> Queue<A> {
    /// Creates a queue holding at most `capacity` items.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                takers: VecDeque::new(),
                offerers: VecDeque::new(),
                next_key: 0,
            })),
        }
    }

    /// Adds `item`, suspending while the queue is full.
    pub fn offer<E: Data>(&self, item: A) -> Effect<(), E> {
        let state = self.state.clone();
        Effect::async_callback(move |cb: Callback<(), E>| {
            let mut guard = state.lock();
            let item = match guard.try_offer(item.clone()) {
                Ok(()) => {
                    drop(guard);
                    cb.succeed(());
                    return None;
                }
                Err(item) => item,
            };
            let key = guard.key();
            guard.offerers.push_back(Offerer {
                key,
                item,
                accept: Box::new(move || cb.succeed(())),
            });
            drop(guard);

            let state = state.clone();
            Some(Canceler::new(move || {
                state.lock().offerers.retain(|o| o.key != key);
            }))
        })
    }

    /// Removes the oldest item, suspending while the queue is empty.
    pub fn take<E: Data>(&self) -> Effect<A, E> {
        let state = self.state.clone();
        Effect::async_callback(move |cb: Callback<A, E>| {
            let mut guard = state.lock();
            if let Some(item) = guard.try_take() {
                drop(guard);
                cb.succeed(item);
                return None;
            }
            let key = guard.key();
            guard.takers.push_back((
                key,
                Box::new(move |item: A| {
                    let back = item.clone();
                    if cb.succeed(item) {
                        Ok(())
                    } else {
                        Err(back)
                    }
                }),
            ));
            drop(guard);

            let state = state.clone();
            Some(Canceler::new(move || {
                state.lock().takers.retain(|(k, _)| *k != key);
            }))
        })
    }

    /// Adds `item` if there is room or a waiting taker. Returns the item
    /// otherwise.
    pub fn try_offer(&self, item: A) -> Result<(), A> {
        self.state.lock().try_offer(item)
    }

    /// Removes the oldest item, if any.
    #[must_use]
    pub fn try_take(&self) -> Option<A> {
        self.state.lock().try_take()
    }

    /// Items currently buffered.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Maximum number of buffered items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn try_operations_respect_capacity() {
        init_test("try_operations_respect_capacity");
        let q = Queue::<u32>::bounded(2);
        assert!(q.try_offer(1).is_ok());
        assert!(q.try_offer(2).is_ok());
        let third = q.try_offer(3);
        crate::assert_with_log!(third == Err(3), "full queue rejects", Err::<(), u32>(3), third);
        crate::assert_with_log!(q.size() == 2, "size", 2usize, q.size());
        let head = q.try_take();
        crate::assert_with_log!(head == Some(1), "fifo", Some(1), head);
        crate::test_complete!("try_operations_respect_capacity");
    }

    #[test]
    fn take_suspends_until_offer() {
        init_test("take_suspends_until_offer");
        let q = Queue::<u32>::bounded(4);
        let program = q.take::<()>().fork::<()>().flat_map({
            let q = q.clone();
            move |taker| {
                Effect::<(), ()>::yield_now()
                    .zip_right(q.offer(9))
                    .zip_right(taker.join())
            }
        });
        let mut lab = LabRuntime::new(Default::default());
        let got = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(got == 9, "delivered item", 9u32, got);
        crate::assert_with_log!(q.size() == 0, "nothing buffered", 0usize, q.size());
        crate::test_complete!("take_suspends_until_offer");
    }

    #[test]
    fn offer_suspends_while_full() {
        init_test("offer_suspends_while_full");
        let q = Queue::<u32>::bounded(1);
        assert!(q.try_offer(1).is_ok());
        let program = q.offer::<()>(2).fork::<()>().flat_map({
            let q = q.clone();
            move |offerer| {
                let q2 = q.clone();
                Effect::<(), ()>::yield_now()
                    .zip_right(Effect::sync(move || q2.size()))
                    .flat_map({
                        let q = q.clone();
                        let offerer = offerer.clone();
                        move |size_before| {
                            let offerer = offerer.clone();
                            q.take::<()>().flat_map(move |first| {
                                offerer.join().map(move |()| (size_before, first))
                            })
                        }
                    })
            }
        });
        let mut lab = LabRuntime::new(Default::default());
        let (size_before, first) = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(size_before == 1, "offer waited", 1usize, size_before);
        crate::assert_with_log!(first == 1, "fifo order", 1u32, first);
        let rest = q.try_take();
        crate::assert_with_log!(rest == Some(2), "blocked item moved in", Some(2), rest);
        crate::test_complete!("offer_suspends_while_full");
    }

    #[test]
    fn zero_capacity_is_a_rendezvous() {
        init_test("zero_capacity_is_a_rendezvous");
        let q = Queue::<&'static str>::bounded(0);
        let rejected = q.try_offer("x");
        crate::assert_with_log!(rejected.is_err(), "no buffer", true, rejected.is_err());

        let program = q.offer::<()>("hello").fork::<()>().flat_map({
            let q = q.clone();
            move |offerer| {
                let offerer = offerer.clone();
                Effect::<(), ()>::yield_now()
                    .zip_right(q.take())
                    .flat_map(move |item| offerer.join().map(move |()| item))
            }
        });
        let mut lab = LabRuntime::new(Default::default());
        let item = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(item == "hello", "handed over", "hello", item);
        crate::assert_with_log!(q.size() == 0, "never buffered", 0usize, q.size());
        crate::test_complete!("zero_capacity_is_a_rendezvous");
    }

    #[test]
    fn interrupted_offer_drops_its_item() {
        init_test("interrupted_offer_drops_its_item");
        let q = Queue::<u32>::bounded(0);
        let program = q.offer::<()>(5).fork::<()>().flat_map(|offerer| {
            Effect::<(), ()>::yield_now().zip_right(offerer.interrupt::<()>())
        });
        let mut lab = LabRuntime::new(Default::default());
        let exit = lab.block_on(program).expect("progress").unwrap();
        crate::assert_with_log!(exit.is_interrupted(), "offerer interrupted", true, exit.is_interrupted());
        let left = q.try_take();
        crate::assert_with_log!(left.is_none(), "item withdrawn", None::<u32>, left);
        crate::test_complete!("interrupted_offer_drops_its_item");
    }

    #[test]
    fn item_delivered_to_an_interrupted_taker_is_not_lost() {
        init_test("item_delivered_to_an_interrupted_taker_is_not_lost");
        let q = Queue::<u32>::bounded(2);
        let mut lab = LabRuntime::new(Default::default());
        let taker = lab.spawn(q.take::<()>());
        lab.run_until_quiescent().expect("within limit");

        let offer = {
            let q = q.clone();
            Effect::<(), ()>::sync(move || {
                let _ = q.try_offer(5);
            })
        };
        let exit = lab
            .block_on(offer.zip_right(taker.interrupt::<()>()))
            .expect("progress")
            .unwrap();
        // The hand-off was accepted, so the taker ends with the item.
        crate::assert_with_log!(exit.value() == Some(&5), "taker kept the item", Some(5), exit);
        crate::assert_with_log!(q.size() == 0, "not duplicated", 0usize, q.size());
        crate::test_complete!("item_delivered_to_an_interrupted_taker_is_not_lost");
    }

    #[test]
    fn item_reaches_the_code_after_take_before_interruption() {
        init_test("item_reaches_the_code_after_take_before_interruption");
        let q = Queue::<u32>::bounded(2);
        let returned = Queue::<u32>::bounded(2);
        let mut lab = LabRuntime::new(Default::default());
        // A consumer that puts back whatever it took if it is interrupted.
        let consumer = {
            let q = q.clone();
            let returned = returned.clone();
            Effect::<u32, ()>::uninterruptible_mask(move |restore| {
                let returned = returned.clone();
                q.take().flat_map(move |item| {
                    let returned = returned.clone();
                    restore.apply(Effect::<(), ()>::never()).on_exit(move |exit| {
                        let returned = returned.clone();
                        let interrupted = exit.is_interrupted();
                        Effect::sync(move || {
                            if interrupted {
                                let _ = returned.try_offer(item);
                            }
                        })
                    })
                    .map(move |()| item)
                })
            })
        };
        let handle = lab.spawn(consumer);
        lab.run_until_quiescent().expect("within limit");

        let offer = {
            let q = q.clone();
            Effect::<(), ()>::sync(move || {
                let _ = q.try_offer(8);
            })
        };
        let exit = lab
            .block_on(offer.zip_right(handle.interrupt::<()>()))
            .expect("progress")
            .unwrap();
        crate::assert_with_log!(exit.is_interrupted(), "consumer interrupted", true, exit);
        let back = returned.try_take();
        crate::assert_with_log!(back == Some(8), "item handed back", Some(8), back);
        crate::test_complete!("item_reaches_the_code_after_take_before_interruption");
    }
}
