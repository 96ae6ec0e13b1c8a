// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Condition variable
//!
//! Waiters are woken in FIFO order. The condition never has an owner and
//! never changes a priority.
//!
//! A wait enqueues the caller first and releases the mutex afterwards,
//! from the enqueue callout. A signal issued after the mutex is released
//! therefore always finds the waiter on the queue. On wakeup the waiter
//! acquires the mutex again before it returns.

use core::cell::Cell;

use super::mutex::Mutex;
use super::recursive::RecursiveMutex;
use crate::sched::state::ThreadStates;
use crate::sched::thread::ThreadRef;
use crate::status::{Errno, Status};
use crate::sync::wait_queue::{Discipline, QueueContext, ThreadQueue};
use crate::time::Timespec;

/// Condition variable
pub struct Condition {
    queue: ThreadQueue,
}

impl Condition {
    /// Create a condition without waiters
    pub const fn new() -> Self {
        Self::named("condition")
    }

    /// Create a condition with a diagnostic name
    pub const fn named(name: &'static str) -> Self {
        Self {
            queue: ThreadQueue::new(name, Discipline::Fifo),
        }
    }

    /// Reset to the initial state
    pub fn initialize(&self) {
        self.queue.reinitialize();
    }

    /// The underlying thread queue
    pub fn queue(&self) -> &ThreadQueue {
        &self.queue
    }

    /// Enqueue `executing`, run `release` once it is enqueued, then block
    ///
    /// # Returns
    /// * The wait status, and whether `release` ran
    fn enqueue(
        &self,
        executing: &ThreadRef,
        abstime: Option<&Timespec>,
        release: &dyn Fn(),
    ) -> (Status, bool) {
        let released = Cell::new(false);
        let callout = || {
            released.set(true);
            release();
        };
        let status = self.queue.acquire().enqueue(
            executing,
            QueueContext::new(ThreadStates::WAITING_FOR_CONDITION_VARIABLE)
                .with_deadline(abstime)
                .with_callout(&callout),
        );
        (status, released.get())
    }

    /// Wait for a signal, `mutex` must be held by `executing`
    pub fn wait(&self, executing: &ThreadRef, mutex: &Mutex) {
        let (_, released) = self.enqueue(executing, None, &|| mutex.release(executing));
        if released {
            mutex.acquire(executing);
        }
    }

    /// Wait for a signal until an absolute timeout
    ///
    /// # Returns
    /// * `Err(Errno::EINVAL)` for a malformed timeout, the mutex is never
    ///   released
    /// * `Err(Errno::ETIMEDOUT)` if the timeout elapsed, the mutex is held
    ///   again on return
    pub fn wait_timed(
        &self,
        executing: &ThreadRef,
        mutex: &Mutex,
        abstime: Option<&Timespec>,
    ) -> Result<(), Errno> {
        let (status, released) = self.enqueue(executing, abstime, &|| mutex.release(executing));
        if released {
            mutex.acquire(executing);
        }
        status.into_result()
    }

    /// Wait for a signal with a recursive mutex held by `executing`
    ///
    /// The mutex is released completely while waiting and the nesting
    /// level is restored afterwards.
    pub fn wait_recursive(&self, executing: &ThreadRef, mutex: &RecursiveMutex) {
        // The result is always success for an untimed wait
        let _ = self.wait_recursive_timed(executing, mutex, None);
    }

    /// Wait for a signal with a recursive mutex until an absolute timeout
    pub fn wait_recursive_timed(
        &self,
        executing: &ThreadRef,
        mutex: &RecursiveMutex,
        abstime: Option<&Timespec>,
    ) -> Result<(), Errno> {
        let nest_level = mutex.nest_level();
        let plain = mutex.mutex();
        let release = || {
            mutex.set_nest_level(0);
            plain.release(executing);
        };
        let (status, released) = self.enqueue(executing, abstime, &release);
        if released {
            plain.acquire(executing);
            mutex.set_nest_level(nest_level);
        }
        status.into_result()
    }

    /// Wake the first waiter
    pub fn signal(&self) {
        self.queue.acquire().extract_first(Status::Successful);
    }

    /// Wake all waiters
    pub fn broadcast(&self) {
        self.queue.acquire().flush(usize::MAX, Status::Successful);
    }

    /// Destroy the condition, it must have no waiters
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}
