// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Futex
//!
//! The futex word lives in caller memory. A waiter compares it with the
//! expected value under the queue lock and only blocks on a match. A
//! waker changes the word before it calls [`Futex::wake`], so it either
//! runs before the compare (the waiter returns `EWOULDBLOCK`) or finds
//! the waiter enqueued. No wakeup is lost.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sched::state::ThreadStates;
use crate::sched::thread::ThreadRef;
use crate::status::{Errno, Status};
use crate::sync::wait_queue::{Discipline, QueueContext, ThreadQueue};

/// Futex wait queue
pub struct Futex {
    queue: ThreadQueue,
}

impl Futex {
    /// Create a futex without waiters
    pub const fn new() -> Self {
        Self {
            queue: ThreadQueue::new("futex", Discipline::Fifo),
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

    /// Block while `*word == expected`
    ///
    /// # Returns
    /// * `Err(Errno::EWOULDBLOCK)` if the word differs, without blocking
    pub fn wait(&self, executing: &ThreadRef, word: &AtomicU32, expected: u32) -> Result<(), Errno> {
        let guard = self.queue.acquire();
        if word.load(Ordering::SeqCst) != expected {
            return Err(Errno::EWOULDBLOCK);
        }
        guard
            .enqueue(executing, QueueContext::new(ThreadStates::WAITING_FOR_FUTEX))
            .into_result()
    }

    /// Wake up to `count` waiters in arrival order
    ///
    /// # Returns
    /// * The number of threads woken
    pub fn wake(&self, count: usize) -> usize {
        self.queue.acquire().flush(count, Status::Successful)
    }

    /// Destroy the futex, it must have no waiters
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

impl Default for Futex {
    fn default() -> Self {
        Self::new()
    }
}
