// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread state and run queue
//!
//! Defines thread state bits, the wait flags used by the block/wakeup
//! handshake, thread priorities, and the ready queue of the default
//! scheduler.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use bitflags::bitflags;

use super::thread::{Thread, ThreadRef};

bitflags! {
    /// Thread state bits
    ///
    /// A thread is ready when no bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadStates: u32 {
        /// Created but not started
        const DORMANT = 1 << 0;
        /// Explicitly suspended
        const SUSPENDED = 1 << 1;
        /// Waiting for a mutex
        const WAITING_FOR_MUTEX = 1 << 2;
        /// Waiting for a condition variable
        const WAITING_FOR_CONDITION_VARIABLE = 1 << 3;
        /// Waiting for a semaphore
        const WAITING_FOR_SEMAPHORE = 1 << 4;
        /// Waiting on a futex
        const WAITING_FOR_FUTEX = 1 << 5;

        /// Every state that keeps a thread on a thread queue
        const BLOCKED = Self::WAITING_FOR_MUTEX.bits()
            | Self::WAITING_FOR_CONDITION_VARIABLE.bits()
            | Self::WAITING_FOR_SEMAPHORE.bits()
            | Self::WAITING_FOR_FUTEX.bits();
    }
}

impl ThreadStates {
    /// The ready state
    pub const READY: ThreadStates = ThreadStates::empty();

    /// Whether the thread may be scheduled
    pub fn is_ready(self) -> bool {
        self.is_empty()
    }
}

bitflags! {
    /// Wait flags of the block/wakeup handshake
    ///
    /// The blocking thread goes `INTEND_TO_BLOCK -> BLOCKED`. The waker
    /// goes `INTEND_TO_BLOCK -> READY_AGAIN` if it wins the race, else it
    /// finds `BLOCKED`, sets `READY_AGAIN` and unblocks the thread itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// Enqueued, not yet blocked
        const INTEND_TO_BLOCK = 1 << 0;
        /// Blocked, a waker must unblock it
        const BLOCKED = 1 << 1;
        /// The wait is over
        const READY_AGAIN = 1 << 2;
    }
}

/// Thread priority
///
/// Larger values are more important. Ordering follows importance, so
/// `max` yields the most important priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u32);

impl Priority {
    /// Idle priority (lowest)
    pub const IDLE: Priority = Priority(0);
    /// Low priority
    pub const LOW: Priority = Priority(64);
    /// Normal priority (default)
    pub const NORMAL: Priority = Priority(128);
    /// High priority
    pub const HIGH: Priority = Priority(192);
    /// Real-time priority (highest)
    pub const REALTIME: Priority = Priority(255);

    /// Raw priority value
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Run queue
///
/// Ready threads of one processor ordered by effective priority, FIFO
/// among equal priorities. The executing thread stays in the queue while
/// it is ready.
#[derive(Default)]
pub struct RunQueue {
    ready: VecDeque<ThreadRef>,
}

impl RunQueue {
    /// Create a new empty run queue
    pub const fn new() -> Self {
        Self {
            ready: VecDeque::new(),
        }
    }

    /// Add a thread behind all threads of equal or higher priority
    pub fn enqueue(&mut self, thread: ThreadRef) {
        let priority = thread.priority();
        let pos = self
            .ready
            .iter()
            .position(|t| t.priority() < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, thread);
    }

    /// Remove a specific thread from the run queue
    pub fn remove(&mut self, thread: &Thread) -> bool {
        match self.ready.iter().position(|t| core::ptr::eq(Arc::as_ptr(t), thread)) {
            Some(pos) => {
                self.ready.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Re-sort a thread after its priority changed
    pub fn requeue(&mut self, thread: &ThreadRef) -> bool {
        if !self.remove(thread) {
            return false;
        }
        self.enqueue(thread.clone());
        true
    }

    /// The thread that should run next
    pub fn highest(&self) -> Option<&ThreadRef> {
        self.ready.front()
    }

    /// Check if the thread is queued
    pub fn contains(&self, thread: &Thread) -> bool {
        self.ready.iter().any(|t| core::ptr::eq(Arc::as_ptr(t), thread))
    }

    /// Check if the run queue is empty
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Get the number of threads in the run queue
    pub fn len(&self) -> usize {
        self.ready.len()
    }
}
