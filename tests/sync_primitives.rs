//! Deferred, semaphore and queue shared by fibers on worker threads.

#[macro_use]
mod common;

use common::*;
use fibra::{Deferred, Effect, FiberHandle, Queue, Semaphore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Forks every effect, then joins them in order.
fn fork_join_all<A: fibra::Data>(effects: Vec<Effect<A, ()>>) -> Effect<Vec<A>, ()> {
    let forked = effects.into_iter().fold(
        Effect::<Vec<FiberHandle<A, ()>>, ()>::succeed(Vec::new()),
        |acc, effect| {
            acc.flat_map(move |handles| {
                effect.fork::<()>().map(move |h| {
                    let mut handles = handles.clone();
                    handles.push(h);
                    handles
                })
            })
        },
    );
    forked.flat_map(|handles| {
        handles
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |acc, h| {
                acc.flat_map(move |values: Vec<A>| {
                    h.join().map(move |v| {
                        let mut values = values.clone();
                        values.push(v);
                        values
                    })
                })
            })
    })
}

#[test]
fn deferred_wakes_every_waiter_across_threads() {
    init_test("deferred_wakes_every_waiter_across_threads");
    let rt = test_runtime(4);
    let gate = Deferred::<u32, ()>::new();
    let waiters: Vec<_> = (0..64).map(|i| gate.wait().map(move |v| v + i)).collect();
    let handle = rt.spawn(fork_join_all(waiters)).expect("runtime alive");

    std::thread::sleep(Duration::from_millis(20));
    let done = gate.is_done();
    assert_with_log!(!done, "not yet completed", false, done);
    rt.block_on(gate.succeed::<()>(100)).expect("runtime alive").unwrap();

    let exit = rt.await_exit(&handle).expect("runtime alive");
    let values = exit.unwrap();
    let expected: Vec<u32> = (0..64).map(|i| 100 + i).collect();
    assert_with_log!(values == expected, "each waiter saw the value", expected, values);
    test_complete!("deferred_wakes_every_waiter_across_threads");
}

#[test]
fn deferred_completes_only_once() {
    init_test("deferred_completes_only_once");
    let rt = test_runtime(2);
    let cell = Deferred::<u32, &'static str>::new();
    let program = cell
        .succeed::<()>(1)
        .flat_map({
            let cell = cell.clone();
            move |first| cell.fail::<()>("late").map(move |second| (first, second))
        });
    let (first, second) = rt.block_on(program).expect("runtime alive").unwrap();
    assert_with_log!(first && !second, "second completion rejected", (true, false), (first, second));
    let exit = cell.try_poll().expect("completed");
    assert_exit_success!(exit, 1);
    test_complete!("deferred_completes_only_once");
}

#[test]
fn semaphore_bounds_concurrency() {
    init_test("semaphore_bounds_concurrency");
    let rt = test_runtime(4);
    let permits = Semaphore::new(3);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<Effect<(), ()>> = (0..24)
        .map(|_| {
            let enter = {
                let active = active.clone();
                let peak = peak.clone();
                Effect::sync(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                })
            };
            let leave = {
                let active = active.clone();
                Effect::sync(move || {
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            };
            permits.with_permit(
                enter
                    .zip_right(Effect::sleep(Duration::from_millis(2)))
                    .zip_right(leave),
            )
        })
        .collect();

    let exit = rt.block_on(fork_join_all(workers)).expect("runtime alive");
    assert_with_log!(exit.is_success(), "all workers finished", true, exit);
    let peak = peak.load(Ordering::SeqCst);
    assert_with_log!(peak <= 3 && peak > 0, "never more than three holders", 3usize, peak);
    let available = permits.available();
    assert_with_log!(available == 3, "permits returned", 3usize, available);
    test_complete!("semaphore_bounds_concurrency");
}

#[test]
fn interrupted_permit_holder_releases() {
    init_test("interrupted_permit_holder_releases");
    let mut lab = test_lab();
    let permits = Semaphore::new(1);
    let holder = lab.spawn(permits.with_permit(Effect::<(), ()>::never()));
    let waiter = lab.spawn(permits.with_permit(Effect::<u32, ()>::succeed(5)));
    lab.run_until_quiescent().expect("within limit");
    let waiting = waiter.is_done();
    assert_with_log!(!waiting, "waiter blocked", false, waiting);

    lab.interrupt(holder.id());
    lab.run().expect("within limit");
    assert_exit_interrupted!(holder.try_exit().expect("holder ended"));
    assert_exit_success!(waiter.try_exit().expect("waiter ended"), 5);
    assert_with_log!(permits.available() == 1, "permit back", 1usize, permits.available());
    test_complete!("interrupted_permit_holder_releases");
}

#[test]
fn interrupted_acquire_does_not_leak_a_permit() {
    init_test("interrupted_acquire_does_not_leak_a_permit");
    let mut lab = test_lab();
    let permits = Semaphore::new(1);
    let holder = lab.spawn(permits.with_permit(Effect::<(), ()>::sleep(Duration::from_millis(10))));
    let blocked = lab.spawn(permits.acquire::<()>());
    lab.run_until_quiescent().expect("within limit");
    lab.interrupt(blocked.id());
    lab.run().expect("within limit");
    assert_exit_interrupted!(blocked.try_exit().expect("ended"));
    assert_exit_success!(holder.try_exit().expect("ended"), ());
    assert_with_log!(permits.available() == 1, "no permit lost", 1usize, permits.available());
    test_complete!("interrupted_acquire_does_not_leak_a_permit");
}

#[test]
fn queue_moves_items_between_threads_in_order() {
    init_test("queue_moves_items_between_threads_in_order");
    let rt = test_runtime(4);
    let queue = Queue::<u32>::bounded(4);
    let producer = (0..200).fold(Effect::<(), ()>::unit(), |acc, i| {
        acc.zip_right(queue.offer(i))
    });
    let consumer = (0..200).fold(Effect::<Vec<u32>, ()>::succeed(Vec::new()), |acc, _| {
        let queue = queue.clone();
        acc.flat_map(move |items| {
            queue.take().map(move |item| {
                let mut items = items.clone();
                items.push(item);
                items
            })
        })
    });
    let program = producer
        .fork::<()>()
        .flat_map(move |p| consumer.flat_map(move |items| p.join().map(move |()| items.clone())));
    let exit = rt.block_on(program).expect("runtime alive");
    let items = exit.unwrap();
    let expected: Vec<u32> = (0..200).collect();
    assert_with_log!(items == expected, "FIFO delivery", "0..200", items);
    assert_with_log!(queue.size() == 0, "drained", 0usize, queue.size());
    test_complete!("queue_moves_items_between_threads_in_order");
}

#[test]
fn full_queue_suspends_offerers() {
    init_test("full_queue_suspends_offerers");
    let mut lab = test_lab();
    let queue = Queue::<&'static str>::bounded(1);
    let offers = lab.spawn(queue.offer::<()>("a").zip_right(queue.offer("b")));
    lab.run_until_quiescent().expect("within limit");
    let done = offers.is_done();
    assert_with_log!(!done, "second offer waits", false, done);
    assert_with_log!(queue.size() == 1, "one buffered", 1usize, queue.size());

    assert_with_log!(queue.try_take() == Some("a"), "first out", Some("a"), queue.size());
    lab.run_until_quiescent().expect("within limit");
    assert_exit_success!(offers.try_exit().expect("offers done"), ());
    assert_with_log!(queue.try_take() == Some("b"), "second out", Some("b"), queue.size());
    test_complete!("full_queue_suspends_offerers");
}

#[test]
fn zero_capacity_queue_is_a_rendezvous() {
    init_test("zero_capacity_queue_is_a_rendezvous");
    let mut lab = test_lab();
    let queue = Queue::<u8>::bounded(0);
    let rejected = queue.try_offer(1);
    assert_with_log!(rejected == Err(1), "nowhere to put it", Err::<(), u8>(1), rejected);

    let offerer = lab.spawn(queue.offer::<()>(7));
    lab.run_until_quiescent().expect("within limit");
    assert_with_log!(!offerer.is_done(), "offer waits for a taker", false, offerer.is_done());
    let taker = lab.spawn(queue.take::<()>());
    lab.run_until_quiescent().expect("within limit");
    assert_exit_success!(taker.try_exit().expect("taken"), 7);
    assert_exit_success!(offerer.try_exit().expect("handed off"), ());
    test_complete!("zero_capacity_queue_is_a_rendezvous");
}

#[test]
fn interrupted_taker_does_not_lose_items() {
    init_test("interrupted_taker_does_not_lose_items");
    let mut lab = test_lab();
    let queue = Queue::<u8>::bounded(2);
    let taker = lab.spawn(queue.take::<()>());
    lab.run_until_quiescent().expect("within limit");
    lab.interrupt(taker.id());
    lab.run().expect("within limit");
    assert_exit_interrupted!(taker.try_exit().expect("ended"));

    queue.try_offer(9).expect("room");
    assert_with_log!(queue.size() == 1, "item stays buffered", 1usize, queue.size());
    let second = lab.spawn(queue.take::<()>());
    lab.run().expect("within limit");
    assert_exit_success!(second.try_exit().expect("ended"), 9);
    test_complete!("interrupted_taker_does_not_lose_items");
}
