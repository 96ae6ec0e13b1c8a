// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting semaphore
//!
//! The count is only changed under the queue lock. A post either hands
//! its unit straight to the first waiter or increments the count, never
//! both, so the count stays zero while threads wait.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sched::state::ThreadStates;
use crate::sched::thread::ThreadRef;
use crate::status::{Errno, Status};
use crate::sync::wait_queue::{Discipline, QueueContext, ThreadQueue};
use crate::time::Timespec;

/// Counting semaphore
pub struct Semaphore {
    queue: ThreadQueue,
    count: AtomicU32,
}

impl Semaphore {
    /// Create a semaphore granting waiters in priority order
    pub const fn new(count: u32) -> Self {
        Self::with_discipline("semaphore", count, Discipline::Priority)
    }

    /// Create a semaphore granting waiters in arrival order
    pub const fn fifo(count: u32) -> Self {
        Self::with_discipline("semaphore", count, Discipline::Fifo)
    }

    /// Create a semaphore with a name and discipline
    ///
    /// A semaphore has no owner, so [`Discipline::PriorityInherit`]
    /// behaves like [`Discipline::Priority`].
    pub const fn with_discipline(name: &'static str, count: u32, discipline: Discipline) -> Self {
        Self {
            queue: ThreadQueue::new(name, discipline),
            count: AtomicU32::new(count),
        }
    }

    /// Reset to `count` units with no waiters
    pub fn initialize(&self, count: u32) {
        self.queue.reinitialize();
        self.count.store(count, Ordering::Release);
    }

    /// Units available
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// The underlying thread queue
    pub fn queue(&self) -> &ThreadQueue {
        &self.queue
    }

    /// Take a unit, blocking until one is posted
    ///
    /// # Returns
    /// * `Err(Errno::EINVAL)` if the semaphore was destroyed
    pub fn wait(&self, executing: &ThreadRef) -> Result<(), Errno> {
        self.wait_timed(executing, None)
    }

    /// Take a unit, blocking until one is posted or the timeout elapses
    ///
    /// # Returns
    /// * `Err(Errno::EINVAL)` for a malformed timeout
    /// * `Err(Errno::ETIMEDOUT)` if the timeout elapsed
    pub fn wait_timed(
        &self,
        executing: &ThreadRef,
        abstime: Option<&Timespec>,
    ) -> Result<(), Errno> {
        let guard = self.queue.acquire();
        let count = self.count.load(Ordering::Relaxed);
        if count > 0 {
            self.count.store(count - 1, Ordering::Release);
            return Ok(());
        }
        guard
            .enqueue(
                executing,
                QueueContext::new(ThreadStates::WAITING_FOR_SEMAPHORE).with_deadline(abstime),
            )
            .into_result()
    }

    /// Take a unit without blocking
    ///
    /// # Returns
    /// * `Err(Errno::EAGAIN)` if no unit is available
    pub fn try_wait(&self) -> Result<(), Errno> {
        let _guard = self.queue.acquire();
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return Err(Errno::EAGAIN);
        }
        self.count.store(count - 1, Ordering::Release);
        Ok(())
    }

    /// Release a unit
    pub fn post(&self) {
        let mut guard = self.queue.acquire();
        if guard.extract_first(Status::Successful).is_none() {
            let count = self.count.load(Ordering::Relaxed);
            self.count.store(count.saturating_add(1), Ordering::Release);
        }
    }

    /// Release a unit, the count never exceeds one
    pub fn post_binary(&self) {
        let mut guard = self.queue.acquire();
        if guard.extract_first(Status::Successful).is_none() {
            self.count.store(1, Ordering::Release);
        }
    }

    /// Destroy the semaphore, it must have no waiters
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::state::Priority;
    use crate::tests::{spawn, test_system, wait_until_blocked};

    static STATIC_SEM: Semaphore = Semaphore::new(1);

    #[test]
    fn test_semaphore_static_count() {
        let system = test_system(1);
        let thread = system.create_thread("t", Priority::NORMAL, 0);

        assert_eq!(STATIC_SEM.wait(&thread), Ok(()));
        assert_eq!(STATIC_SEM.count(), 0);
        assert_eq!(STATIC_SEM.try_wait(), Err(Errno::EAGAIN));
        STATIC_SEM.post();
        assert_eq!(STATIC_SEM.count(), 1);
    }

    #[test]
    fn test_semaphore_post_hands_unit_to_waiter() {
        let system = test_system(1);
        let thread = system.create_thread("waiter", Priority::NORMAL, 0);
        let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::fifo(0)));

        let worker = spawn(&thread, move |t| sem.wait(t));
        wait_until_blocked(&thread);
        assert_eq!(sem.count(), 0);

        sem.post();
        assert_eq!(worker.join().unwrap(), Ok(()));
        assert_eq!(sem.count(), 0);
        sem.post();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_semaphore_binary_post() {
        let sem = Semaphore::new(0);
        sem.post_binary();
        sem.post_binary();
        assert_eq!(sem.count(), 1);
        assert_eq!(sem.try_wait(), Ok(()));
        assert_eq!(sem.try_wait(), Err(Errno::EAGAIN));
    }

    #[test]
    fn test_semaphore_wait_timed() {
        let system = test_system(1);
        let thread = system.create_thread("t", Priority::NORMAL, 0);
        let sem = Semaphore::new(0);

        let bad = Timespec::new(0, 1_000_000_000);
        assert_eq!(sem.wait_timed(&thread, Some(&bad)), Err(Errno::EINVAL));
        let elapsed = Timespec::new(0, 0);
        assert_eq!(sem.wait_timed(&thread, Some(&elapsed)), Err(Errno::ETIMEDOUT));

        sem.post();
        assert_eq!(sem.wait_timed(&thread, Some(&elapsed)), Ok(()));
    }

    #[test]
    fn test_semaphore_priority_order() {
        let system = test_system(1);
        let low = system.create_thread("low", Priority::LOW, 0);
        let high = system.create_thread("high", Priority::HIGH, 0);
        let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0)));

        let wl = spawn(&low, move |t| sem.wait(t));
        wait_until_blocked(&low);
        let wh = spawn(&high, move |t| sem.wait(t));
        wait_until_blocked(&high);

        sem.post();
        assert_eq!(wh.join().unwrap(), Ok(()));
        assert!(low.is_blocked());
        sem.post();
        assert_eq!(wl.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_semaphore_destroyed_waiters_get_einval() {
        let system = test_system(1);
        let thread = system.create_thread("t", Priority::NORMAL, 0);
        let sem = Semaphore::new(0);

        sem.destroy();
        assert_eq!(sem.wait(&thread), Err(Errno::EINVAL));
        sem.initialize(2);
        assert_eq!(sem.count(), 2);
        assert_eq!(sem.wait(&thread), Ok(()));
    }
}
