// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Blocking Object Integration Tests
//!
//! These tests run several kernel threads against one object and check
//! the guarantees the objects give together with the scheduler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as HostMutex};
use std::vec::Vec;

use super::{spawn, test_system, wait_until_blocked};
use crate::arch;
use crate::fatal::{FatalError, InternalError};
use crate::sched::state::Priority;
use crate::status::Errno;
use crate::sync::{Condition, Futex, Mutex, RecursiveMutex, Semaphore};
use crate::time::Timespec;

/// Mutual exclusion under contention
#[test]
fn test_mutex_mutual_exclusion() {
    const THREADS: usize = 4;
    const ROUNDS: u32 = 200;

    let system = test_system(2);
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    // Read-modify-write in two steps, a lost update means two owners
    let counter: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));
    let inside: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let thread = system.create_thread("worker", Priority::NORMAL, i % 2);
            spawn(&thread, move |t| {
                for _ in 0..ROUNDS {
                    mutex.acquire(t);
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    let value = counter.load(Ordering::Relaxed);
                    std::thread::yield_now();
                    counter.store(value + 1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    mutex.release(t);
                }
                t.resource_count()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 0);
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS as u32 * ROUNDS);
    assert!(!mutex.is_locked());
    assert!(mutex.queue().is_empty());
}

/// The owner runs at the priority of its most important waiter
#[test]
fn test_priority_inheritance() {
    let system = test_system(1);
    let low = system.create_thread("low", Priority::LOW, 0);
    let mid = system.create_thread("mid", Priority::NORMAL, 0);
    let high = system.create_thread("high", Priority::HIGH, 0);
    low.start();
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    mutex.acquire(&low);
    let wm = spawn(&mid, move |t| {
        mutex.acquire(t);
        mutex.release(t);
    });
    wait_until_blocked(&mid);
    assert_eq!(low.priority(), Priority::NORMAL);

    let order = Arc::new(HostMutex::new(Vec::new()));
    let seen = order.clone();
    let wh = spawn(&high, move |t| {
        mutex.acquire(t);
        seen.lock().unwrap().push(t.priority());
        mutex.release(t);
    });
    wait_until_blocked(&high);
    assert_eq!(low.priority(), Priority::HIGH);
    assert_eq!(low.base_priority(), Priority::LOW);

    mutex.release(&low);
    assert_eq!(low.priority(), Priority::LOW);
    wh.join().unwrap();
    wm.join().unwrap();

    // High got the mutex first, inheriting from mid changes nothing
    assert_eq!(*order.lock().unwrap(), [Priority::HIGH]);
    assert_eq!(mid.priority(), Priority::NORMAL);
    assert!(!mutex.is_locked());
}

/// Inherited priority follows a chain of owners
#[test]
fn test_priority_inheritance_transitive() {
    let system = test_system(1);
    let low = system.create_thread("low", Priority::LOW, 0);
    let mid = system.create_thread("mid", Priority::NORMAL, 0);
    let high = system.create_thread("high", Priority::REALTIME, 0);
    low.start();
    let outer: &'static Mutex = Box::leak(Box::new(Mutex::named("outer")));
    let inner: &'static Mutex = Box::leak(Box::new(Mutex::named("inner")));

    outer.acquire(&low);
    let wm = spawn(&mid, move |t| {
        inner.acquire(t);
        outer.acquire(t);
        outer.release(t);
        inner.release(t);
    });
    wait_until_blocked(&mid);
    assert!(mid.is_waiting_on(outer.queue()));
    assert_eq!(low.priority(), Priority::NORMAL);

    let wh = spawn(&high, move |t| {
        inner.acquire(t);
        inner.release(t);
    });
    wait_until_blocked(&high);
    assert_eq!(mid.priority(), Priority::REALTIME);
    assert_eq!(low.priority(), Priority::REALTIME);

    outer.release(&low);
    assert_eq!(low.priority(), Priority::LOW);
    wm.join().unwrap();
    wh.join().unwrap();
    assert_eq!(mid.priority(), Priority::NORMAL);
}

/// Equal-priority waiters are granted the mutex in arrival order
#[test]
fn test_fifo_handoff_order() {
    const WAITERS: usize = 4;

    let system = test_system(1);
    let owner = system.create_thread("owner", Priority::NORMAL, 0);
    owner.start();
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    let order = Arc::new(HostMutex::new(Vec::new()));

    mutex.acquire(&owner);
    let workers: Vec<_> = (0..WAITERS)
        .map(|i| {
            let thread = system.create_thread("waiter", Priority::NORMAL, 0);
            let order = order.clone();
            let worker = spawn(&thread, move |t| {
                mutex.acquire(t);
                order.lock().unwrap().push(i);
                mutex.release(t);
            });
            wait_until_blocked(&thread);
            worker
        })
        .collect();
    assert_eq!(mutex.queue().len(), WAITERS);

    mutex.release(&owner);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
}

/// N acquisitions need N releases
#[test]
fn test_recursive_release_count() {
    const DEPTH: u32 = 5;

    let system = test_system(1);
    let owner = system.create_thread("owner", Priority::NORMAL, 0);
    let other = system.create_thread("other", Priority::NORMAL, 0);
    let rmutex: &'static RecursiveMutex = Box::leak(Box::new(RecursiveMutex::new()));

    for _ in 0..DEPTH {
        rmutex.acquire(&owner);
    }
    assert_eq!(rmutex.nest_level(), DEPTH - 1);
    for _ in 0..DEPTH - 1 {
        rmutex.release(&owner);
    }
    assert_eq!(rmutex.try_acquire(&other), Err(Errno::EBUSY));

    let worker = spawn(&other, move |t| {
        rmutex.acquire(t);
        let level = rmutex.nest_level();
        rmutex.release(t);
        level
    });
    wait_until_blocked(&other);
    rmutex.release(&owner);
    assert_eq!(worker.join().unwrap(), 0);
    assert!(rmutex.owner().is_none());
}

/// An elapsed timeout removes the waiter and leaves the object unchanged
#[test]
fn test_timeouts() {
    let system = test_system(1);
    let owner = system.create_thread("owner", Priority::LOW, 0);
    let waiter = system.create_thread("waiter", Priority::HIGH, 0);
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0)));

    mutex.acquire(&owner);
    let worker = spawn(&waiter, move |t| {
        let port = arch::port();
        let on_mutex = mutex.acquire_timed(t, Some(&port.now().add_nanos(20_000_000)));
        let on_sem = sem.wait_timed(t, Some(&port.now().add_nanos(20_000_000)));
        (on_mutex, on_sem)
    });
    assert_eq!(
        worker.join().unwrap(),
        (Err(Errno::ETIMEDOUT), Err(Errno::ETIMEDOUT))
    );

    assert!(mutex.queue().is_empty());
    assert!(sem.queue().is_empty());
    assert_eq!(sem.count(), 0);
    assert_eq!(owner.priority(), Priority::LOW);
    assert!(!waiter.is_blocked());
    mutex.release(&owner);
}

/// Timeout validation against a held and a free mutex
#[test]
fn test_timed_acquire_deadlines() {
    let system = test_system(1);
    let owner = system.create_thread("owner", Priority::NORMAL, 0);
    let other = system.create_thread("other", Priority::NORMAL, 0);
    let mutex = Mutex::new();

    mutex.acquire(&owner);
    let now = arch::port().now();
    assert_eq!(mutex.acquire_timed(&other, Some(&now)), Err(Errno::ETIMEDOUT));
    let malformed = Timespec::new(now.tv_sec + 60, 1_000_000_000);
    assert_eq!(mutex.acquire_timed(&other, Some(&malformed)), Err(Errno::EINVAL));
    assert!(mutex.queue().is_empty());
    assert!(!other.is_blocked());
    mutex.release(&owner);

    let unreachable = Timespec::new(i64::MAX, 999_999_999);
    let start = std::time::Instant::now();
    assert_eq!(mutex.acquire_timed(&other, Some(&unreachable)), Ok(()));
    assert!(start.elapsed() < std::time::Duration::from_secs(1));
    mutex.release(&other);
}

/// Signal wakes one waiter, broadcast wakes all
#[test]
fn test_condition_generations() {
    const WAITERS: usize = 3;

    let system = test_system(2);
    let signaller = system.create_thread("signaller", Priority::NORMAL, 0);
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    let cond: &'static Condition = Box::leak(Box::new(Condition::new()));
    let generation: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));

    let threads: Vec<_> = (0..WAITERS)
        .map(|i| system.create_thread("waiter", Priority::NORMAL, i % 2))
        .collect();
    let mut workers: Vec<_> = threads
        .iter()
        .map(|thread| {
            let worker = spawn(thread, move |t| {
                mutex.acquire(t);
                let seen = generation.load(Ordering::SeqCst);
                while generation.load(Ordering::SeqCst) == seen {
                    cond.wait(t, mutex);
                }
                let now = generation.load(Ordering::SeqCst);
                mutex.release(t);
                now
            });
            wait_until_blocked(thread);
            worker
        })
        .collect();

    mutex.acquire(&signaller);
    generation.fetch_add(1, Ordering::SeqCst);
    cond.signal();
    mutex.release(&signaller);

    // Waiters queue in arrival order, the first one is woken
    assert_eq!(workers.remove(0).join().unwrap(), 1);
    assert_eq!(cond.queue().len(), WAITERS - 1);
    for thread in &threads[1..] {
        assert!(thread.is_blocked());
    }

    mutex.acquire(&signaller);
    generation.fetch_add(1, Ordering::SeqCst);
    cond.broadcast();
    mutex.release(&signaller);
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 2);
    }
    assert!(cond.queue().is_empty());
}

/// One signal wakes one waiter, the next signal wakes the other
#[test]
fn test_condition_signal_wakes_one_at_a_time() {
    let system = test_system(1);
    let signaller = system.create_thread("signaller", Priority::NORMAL, 0);
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    let cond: &'static Condition = Box::leak(Box::new(Condition::new()));
    let tokens: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));
    let woken: &'static [AtomicU32; 2] =
        Box::leak(Box::new([AtomicU32::new(0), AtomicU32::new(0)]));

    let threads: Vec<_> = (0..2)
        .map(|_| system.create_thread("waiter", Priority::NORMAL, 0))
        .collect();
    let mut workers: Vec<_> = threads
        .iter()
        .enumerate()
        .map(|(i, thread)| {
            let worker = spawn(thread, move |t| {
                mutex.acquire(t);
                while tokens.load(Ordering::SeqCst) == 0 {
                    cond.wait(t, mutex);
                }
                tokens.fetch_sub(1, Ordering::SeqCst);
                woken[i].fetch_add(1, Ordering::SeqCst);
                mutex.release(t);
            });
            wait_until_blocked(thread);
            worker
        })
        .collect();

    let signal = || {
        mutex.acquire(&signaller);
        tokens.fetch_add(1, Ordering::SeqCst);
        cond.signal();
        mutex.release(&signaller);
    };

    signal();
    workers.remove(0).join().unwrap();
    assert_eq!(woken[0].load(Ordering::SeqCst), 1);
    assert_eq!(woken[1].load(Ordering::SeqCst), 0);
    assert!(threads[1].is_blocked());
    assert_eq!(cond.queue().len(), 1);

    signal();
    workers.remove(0).join().unwrap();
    assert_eq!(woken[0].load(Ordering::SeqCst), 1);
    assert_eq!(woken[1].load(Ordering::SeqCst), 1);
    assert!(cond.queue().is_empty());
}

/// A wake of two with two waiters reports both
#[test]
fn test_futex_wake_reports_all_woken() {
    let system = test_system(1);
    let futex: &'static Futex = Box::leak(Box::new(Futex::new()));
    let word: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));

    let threads: Vec<_> = (0..2)
        .map(|_| system.create_thread("waiter", Priority::NORMAL, 0))
        .collect();
    let workers: Vec<_> = threads
        .iter()
        .map(|thread| {
            let worker = spawn(thread, move |t| futex.wait(t, word, 0));
            wait_until_blocked(thread);
            worker
        })
        .collect();

    word.store(1, Ordering::SeqCst);
    assert_eq!(futex.wake(2), 2);
    for worker in workers {
        assert_eq!(worker.join().unwrap(), Ok(()));
    }
    assert_eq!(futex.wake(2), 0);
}

/// Wake counts and the value check of the futex
#[test]
fn test_futex_wait_wake() {
    let system = test_system(1);
    let futex: &'static Futex = Box::leak(Box::new(Futex::new()));
    let word: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));

    let threads: Vec<_> = (0..2)
        .map(|_| system.create_thread("waiter", Priority::NORMAL, 0))
        .collect();
    let mut workers: Vec<_> = threads
        .iter()
        .map(|thread| {
            let worker = spawn(thread, move |t| futex.wait(t, word, 0));
            wait_until_blocked(thread);
            worker
        })
        .collect();

    word.store(1, Ordering::SeqCst);
    assert_eq!(futex.wake(1), 1);
    assert_eq!(workers.remove(0).join().unwrap(), Ok(()));
    assert!(threads[1].is_blocked());

    assert_eq!(futex.wake(2), 1);
    assert_eq!(workers.remove(0).join().unwrap(), Ok(()));
    assert_eq!(futex.wake(2), 0);

    let late = system.create_thread("late", Priority::NORMAL, 0);
    assert_eq!(futex.wait(&late, word, 0), Err(Errno::EWOULDBLOCK));
}

/// Acquiring an owned mutex again is fatal, exactly once
#[test]
fn test_self_deadlock_is_fatal() {
    static FATALS: AtomicU32 = AtomicU32::new(0);
    fn handler(error: &FatalError) {
        assert_eq!(*error, FatalError::Internal(InternalError::ThreadQueueDeadlock));
        FATALS.fetch_add(1, Ordering::SeqCst);
    }

    let system = test_system(1);
    system.set_fatal_handler(handler);
    let thread = system.create_thread("t", Priority::NORMAL, 0);
    let mutex = Mutex::new();

    mutex.acquire(&thread);
    let result = catch_unwind(AssertUnwindSafe(|| mutex.acquire(&thread)));
    assert!(result.is_err());
    assert_eq!(FATALS.load(Ordering::SeqCst), 1);

    // The object is left as it was
    assert!(mutex.queue().is_empty());
    assert!(Arc::ptr_eq(&mutex.owner().unwrap(), &thread));
    assert!(!thread.is_blocked());
    mutex.release(&thread);
    assert!(!mutex.is_locked());
}
