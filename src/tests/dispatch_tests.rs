// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Dispatch Integration Tests
//!
//! Blocking and waking through objects changes the heir, and the heir is
//! switched to at the next safe point of its processor.

use std::time::{Duration, Instant};
use std::vec::Vec;

use super::{spawn, test_system, wait_until_blocked};
use crate::arch::host::{self, HOST_PORT};
use crate::sched::percpu::{PerCpu, PerCpuState};
use crate::sched::state::Priority;
use crate::sched::thread::ThreadRef;
use crate::sync::{Mutex, Semaphore};
use crate::system::System;

fn executing_is(cpu: &PerCpu, thread: &ThreadRef) -> bool {
    cpu.executing()
        .is_some_and(|t| std::sync::Arc::ptr_eq(&t, thread))
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > Duration::from_secs(5) {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Bring every processor of `system` up, secondaries on host threads
fn boot(system: &'static System) {
    system.start_processors(|_| true);
    let secondaries: Vec<_> = (1..system.processor_count())
        .map(|index| {
            std::thread::spawn(move || {
                host::bind_processor(index);
                system.start_multitasking_on_secondary(index);
            })
        })
        .collect();
    system.request_start_multitasking();
    system.start_multitasking(system.config().boot_processor);
    for secondary in secondaries {
        secondary.join().unwrap();
    }
}

#[test]
fn test_blocking_switches_to_next_ready_thread() {
    let system = test_system(1);
    let low = system.create_thread("low", Priority::LOW, 0);
    let high = system.create_thread("high", Priority::HIGH, 0);
    low.start();
    boot(system);
    let cpu = system.cpu(0);
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    mutex.acquire(&low);
    let worker = spawn(&high, move |t| {
        mutex.acquire(t);
        mutex.release(t);
    });
    wait_until_blocked(&high);
    wait_for("low to run", || executing_is(cpu, &low));
    assert_eq!(system.scheduler().ready_count(cpu), 1);

    mutex.release(&low);
    wait_for("high to run", || executing_is(cpu, &high));
    worker.join().unwrap();
    assert_eq!(system.scheduler().ready_count(cpu), 2);
    assert_eq!(cpu.dispatch_disable_level(), 0);
}

#[test]
fn test_inherited_priority_preempts() {
    let system = test_system(1);
    let low = system.create_thread("low", Priority::LOW, 0);
    let mid = system.create_thread("mid", Priority::NORMAL, 0);
    let high = system.create_thread("high", Priority::HIGH, 0);
    low.start();
    mid.start();
    boot(system);
    let cpu = system.cpu(0);
    assert!(executing_is(cpu, &mid));
    let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    // Low owns the mutex but mid keeps it from running
    mutex.acquire(&low);
    let worker = spawn(&high, move |t| {
        mutex.acquire(t);
        mutex.release(t);
    });
    wait_until_blocked(&high);
    assert_eq!(low.priority(), Priority::HIGH);
    wait_for("low to preempt mid", || executing_is(cpu, &low));

    mutex.release(&low);
    worker.join().unwrap();
    wait_for("high to finish", || !high.is_blocked());
    assert_eq!(low.priority(), Priority::LOW);
}

#[test]
fn test_remote_heir_interrupts_processor() {
    let system = test_system(2);
    boot(system);
    let remote = system.cpu(1);
    assert_eq!(remote.state(), PerCpuState::Up);

    let thread = system.create_thread("remote", Priority::NORMAL, 1);
    let ipis = HOST_PORT.ipi_count(1);
    thread.start();

    // The heir changed from processor 0, processor 1 has to switch itself
    assert!(HOST_PORT.ipi_count(1) > ipis);
    assert!(remote.is_dispatch_necessary());
    assert!(remote.executing().is_none());
    assert_eq!(remote.dispatch_disable_level(), 0);

    let switched = std::thread::spawn(move || {
        host::bind_processor(1);
        let cpu = system.cpu(1);
        cpu.isr_enter();
        system.inter_processor_interrupt(1);
        cpu.isr_exit()
    })
    .join()
    .unwrap();
    assert!(switched);
    assert!(executing_is(remote, &thread));
}

#[test]
fn test_remote_wakeup_disables_calling_processor() {
    let system = test_system(2);
    boot(system);
    let local = system.cpu(0);
    let remote = system.cpu(1);
    let thread = system.create_thread("remote", Priority::NORMAL, 1);

    // Bookkeeping on processor 0 for a thread homed on processor 1
    let guard = thread.dispatch_disable();
    assert_eq!(guard.cpu().index(), 0);
    thread.start();
    assert_eq!(local.dispatch_disable_level(), 1);
    assert_eq!(remote.dispatch_disable_level(), 0);
    assert!(remote.is_dispatch_necessary());

    // Processor 1 takes the interrupt before processor 0 is done
    let switched = std::thread::spawn(move || {
        host::bind_processor(1);
        let cpu = system.cpu(1);
        cpu.isr_enter();
        system.inter_processor_interrupt(1);
        cpu.isr_exit()
    })
    .join()
    .unwrap();
    assert!(switched);
    assert!(executing_is(remote, &thread));
    assert!(!remote.is_dispatch_necessary());

    drop(guard);
    assert_eq!(local.dispatch_disable_level(), 0);
    assert_eq!(remote.dispatch_disable_level(), 0);
    assert!(executing_is(remote, &thread));
}

#[test]
fn test_semaphore_wakeup_across_processors() {
    let system = test_system(2);
    let waiter = system.create_thread("waiter", Priority::NORMAL, 1);
    let poster = system.create_thread("poster", Priority::NORMAL, 0);
    poster.start();
    boot(system);
    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0)));

    let worker = spawn(&waiter, move |t| sem.wait(t));
    wait_until_blocked(&waiter);
    assert_eq!(system.scheduler().ready_count(system.cpu(1)), 0);

    sem.post();
    assert_eq!(worker.join().unwrap(), Ok(()));
    assert_eq!(system.scheduler().ready_count(system.cpu(1)), 1);
    assert!(system.cpu(1).heir().is_some());
}
