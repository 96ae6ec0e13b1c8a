// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Recursive mutex
//!
//! A [`Mutex`] plus a nesting level. The owner may acquire again, which
//! only increments the level. Release decrements it and the mutex is
//! handed on when the outermost acquisition is released.

use core::sync::atomic::{AtomicU32, Ordering};

use super::mutex::{self, Mutex};
use crate::sched::state::ThreadStates;
use crate::sched::thread::ThreadRef;
use crate::status::{Errno, Status};
use crate::sync::wait_queue::QueueContext;
use crate::time::Timespec;

/// Recursive, priority-inheriting mutex
pub struct RecursiveMutex {
    mutex: Mutex,
    /// Acquisitions beyond the first, only touched by the owner
    nest_level: AtomicU32,
}

impl RecursiveMutex {
    /// Create an unowned recursive mutex
    pub const fn new() -> Self {
        Self::named("recursive mutex")
    }

    /// Create an unowned recursive mutex with a diagnostic name
    pub const fn named(name: &'static str) -> Self {
        Self {
            mutex: Mutex::named(name),
            nest_level: AtomicU32::new(0),
        }
    }

    /// Reset to the unowned state with no waiters
    pub fn initialize(&self) {
        self.mutex.initialize();
        self.nest_level.store(0, Ordering::Relaxed);
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadRef> {
        self.mutex.owner()
    }

    /// Acquisitions beyond the first
    pub fn nest_level(&self) -> u32 {
        self.nest_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_nest_level(&self, level: u32) {
        self.nest_level.store(level, Ordering::Relaxed);
    }

    /// The underlying mutex
    pub fn mutex(&self) -> &Mutex {
        &self.mutex
    }

    /// Acquire without blocking
    ///
    /// # Returns
    /// * `Err(Errno::EBUSY)` if another thread owns the mutex
    pub fn try_acquire(&self, executing: &ThreadRef) -> Result<(), Errno> {
        let mut guard = self.mutex.queue().acquire();
        if guard.owner().is_none() {
            mutex::claim(&mut guard, executing);
            return Ok(());
        }
        if guard.is_owner(executing) {
            self.nest_level.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        Err(Errno::EBUSY)
    }

    /// Acquire, blocking without a timeout if another thread owns it
    pub fn acquire(&self, executing: &ThreadRef) {
        let status = self.seize(executing, None);
        if !status.is_successful() {
            log::warn!("recursive mutex: acquire ended with {:?}", status);
        }
    }

    /// Acquire with an absolute timeout, `None` waits forever
    ///
    /// # Returns
    /// * `Err(Errno::EINVAL)` for a malformed timeout, without blocking
    /// * `Err(Errno::ETIMEDOUT)` if the timeout elapsed
    pub fn acquire_timed(
        &self,
        executing: &ThreadRef,
        abstime: Option<&Timespec>,
    ) -> Result<(), Errno> {
        self.seize(executing, abstime).into_result()
    }

    fn seize(&self, executing: &ThreadRef, abstime: Option<&Timespec>) -> Status {
        let mut guard = self.mutex.queue().acquire();
        if guard.owner().is_none() {
            mutex::claim(&mut guard, executing);
            return Status::Successful;
        }
        if guard.is_owner(executing) {
            self.nest_level.fetch_add(1, Ordering::Relaxed);
            return Status::Successful;
        }
        guard.enqueue(
            executing,
            QueueContext::new(ThreadStates::WAITING_FOR_MUTEX).with_deadline(abstime),
        )
    }

    /// Release one acquisition
    pub fn release(&self, executing: &ThreadRef) {
        let guard = self.mutex.queue().acquire();
        if !guard.is_owner(executing) {
            log::warn!("recursive mutex: release by non-owner {}", executing.name());
            return;
        }
        let level = self.nest_level.load(Ordering::Relaxed);
        if level > 0 {
            self.nest_level.store(level - 1, Ordering::Relaxed);
            return;
        }
        mutex::release_owned(guard, executing);
    }

    /// Destroy the mutex, it must be unowned and without waiters
    pub fn destroy(&self) {
        self.mutex.destroy();
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
