// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Integration Tests
//!
//! This module contains the shared test harness and the tests that
//! exercise several subsystems together. Every test builds its own
//! [`System`] so tests can run in parallel.
//!
//! Kernel threads run on host threads through the hosted port. A test
//! drives a thread with [`spawn`] and waits for it to block with
//! [`wait_until_blocked`].

mod dispatch_tests;
mod sync_tests;

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::arch::host;
use crate::config::Config;
use crate::logging;
use crate::sched::thread::{Thread, ThreadRef};
use crate::system::System;

const BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a leaked system with `processor_count` processors
pub(crate) fn test_system(processor_count: usize) -> &'static System {
    // Only the first call installs the logger
    let _ = logging::init(logging::stderr_sink);
    match System::new(Config::smp(processor_count)) {
        Ok(system) => Box::leak(Box::new(system)),
        Err(e) => panic!("test system: {}", e),
    }
}

/// Start `thread` and run `f` as its body on a host thread bound to its
/// home processor
pub(crate) fn spawn<T, F>(thread: &ThreadRef, f: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&ThreadRef) -> T + Send + 'static,
{
    thread.start();
    let thread = thread.clone();
    std::thread::Builder::new()
        .name(thread.name().into())
        .spawn(move || {
            host::bind_processor(thread.cpu());
            f(&thread)
        })
        .unwrap()
}

/// Wait until `thread` is blocked on a thread queue
///
/// # Panics
/// Panics if the thread does not block within a few seconds.
pub(crate) fn wait_until_blocked(thread: &Thread) {
    let start = Instant::now();
    while !thread.is_blocked() {
        if start.elapsed() > BLOCK_TIMEOUT {
            panic!("thread {} did not block", thread.name());
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
