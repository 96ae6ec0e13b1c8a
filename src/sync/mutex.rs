// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Mutex
//!
//! A non-recursive mutex with priority inheritance and direct handoff.
//!
//! # Design
//!
//! - Uncontended acquire and release only touch the owner field under the
//!   queue lock.
//! - Release hands ownership straight to the first waiter. The woken
//!   thread returns from its acquire already owning the mutex.
//! - While threads wait, the owner runs at the highest of its base
//!   priority and the waiters' priorities.
//! - Acquiring a mutex the caller already owns is a fatal deadlock.
//!
//! # Usage
//!
//! ```ignore
//! static LOCK: Mutex = Mutex::new();
//!
//! LOCK.acquire(&executing);
//! // critical section
//! LOCK.release(&executing);
//! ```

use crate::sched::state::ThreadStates;
use crate::sched::thread::ThreadRef;
use crate::status::{Errno, Status};
use crate::sync::wait_queue::{Discipline, QueueContext, QueueGuard, ThreadQueue};
use crate::time::Timespec;

/// Non-recursive, priority-inheriting mutex
pub struct Mutex {
    queue: ThreadQueue,
}

impl Mutex {
    /// Create an unowned mutex
    pub const fn new() -> Self {
        Self::named("mutex")
    }

    /// Create an unowned mutex with a diagnostic name
    pub const fn named(name: &'static str) -> Self {
        Self {
            queue: ThreadQueue::new(name, Discipline::PriorityInherit),
        }
    }

    /// Reset to the unowned state with no waiters
    pub fn initialize(&self) {
        self.queue.reinitialize();
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadRef> {
        self.queue.owner()
    }

    /// Check if the mutex is owned
    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// The underlying thread queue
    pub fn queue(&self) -> &ThreadQueue {
        &self.queue
    }

    /// Acquire without blocking
    ///
    /// # Returns
    /// * `Err(Errno::EBUSY)` if the mutex is owned, also by the caller
    pub fn try_acquire(&self, executing: &ThreadRef) -> Result<(), Errno> {
        let mut guard = self.queue.acquire();
        if guard.owner().is_some() {
            return Err(Errno::EBUSY);
        }
        claim(&mut guard, executing);
        Ok(())
    }

    /// Acquire, blocking without a timeout
    pub fn acquire(&self, executing: &ThreadRef) {
        let status = self.seize(executing, None);
        if !status.is_successful() {
            log::warn!("mutex {}: acquire ended with {:?}", self.queue.name(), status);
        }
    }

    /// Acquire with an absolute timeout, `None` waits forever
    ///
    /// The timeout is only looked at if the caller has to wait.
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
        let mut guard = self.queue.acquire();
        if guard.owner().is_none() {
            claim(&mut guard, executing);
            return Status::Successful;
        }
        guard.enqueue(
            executing,
            QueueContext::new(ThreadStates::WAITING_FOR_MUTEX).with_deadline(abstime),
        )
    }

    /// Release, handing ownership to the first waiter
    pub fn release(&self, executing: &ThreadRef) {
        let guard = self.queue.acquire();
        if !guard.is_owner(executing) {
            log::warn!(
                "mutex {}: release by non-owner {}",
                self.queue.name(),
                executing.name()
            );
            return;
        }
        release_owned(guard, executing);
    }

    /// Destroy the mutex, it must be unowned and without waiters
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Make `executing` the owner of an unowned mutex
pub(crate) fn claim(guard: &mut QueueGuard<'_>, executing: &ThreadRef) {
    executing.acquired_resource();
    guard.set_owner(Some(executing.clone()));
}

/// Give up ownership held by `executing`, handing it to the first waiter
pub(crate) fn release_owned(mut guard: QueueGuard<'_>, executing: &ThreadRef) {
    executing.released_resource();
    let heir = guard.extract_first(Status::Successful);
    if let Some(heir) = &heir {
        heir.acquired_resource();
        log::debug!(
            "mutex {}: handoff {} -> {}",
            guard.queue().name(),
            executing.name(),
            heir.name()
        );
    }
    guard.set_owner(heir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::sched::state::Priority;
    use crate::tests::{spawn, test_system, wait_until_blocked};
    use alloc::sync::Arc;

    static STATIC_MUTEX: Mutex = Mutex::new();

    #[test]
    fn test_mutex_static_initializer() {
        let system = test_system(1);
        let thread = system.create_thread("t", Priority::NORMAL, 0);
        thread.start();

        assert!(!STATIC_MUTEX.is_locked());
        STATIC_MUTEX.acquire(&thread);
        assert!(Arc::ptr_eq(&STATIC_MUTEX.owner().unwrap(), &thread));
        assert_eq!(thread.resource_count(), 1);
        STATIC_MUTEX.release(&thread);
        assert!(!STATIC_MUTEX.is_locked());
        assert_eq!(thread.resource_count(), 0);
    }

    #[test]
    fn test_mutex_try_acquire() {
        let system = test_system(1);
        let a = system.create_thread("a", Priority::NORMAL, 0);
        let b = system.create_thread("b", Priority::NORMAL, 0);
        let mutex = Mutex::new();

        assert_eq!(mutex.try_acquire(&a), Ok(()));
        assert_eq!(mutex.try_acquire(&b), Err(Errno::EBUSY));
        assert_eq!(mutex.try_acquire(&a), Err(Errno::EBUSY));
        mutex.release(&a);
        assert_eq!(mutex.try_acquire(&b), Ok(()));
        mutex.release(&b);
    }

    #[test]
    fn test_mutex_release_by_non_owner_ignored() {
        let system = test_system(1);
        let a = system.create_thread("a", Priority::NORMAL, 0);
        let b = system.create_thread("b", Priority::NORMAL, 0);
        let mutex = Mutex::new();

        mutex.acquire(&a);
        mutex.release(&b);
        assert!(Arc::ptr_eq(&mutex.owner().unwrap(), &a));
        mutex.release(&a);
    }

    #[test]
    fn test_mutex_handoff() {
        let system = test_system(1);
        let owner = system.create_thread("owner", Priority::NORMAL, 0);
        let waiter = system.create_thread("waiter", Priority::NORMAL, 0);
        owner.start();
        let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));

        mutex.acquire(&owner);
        let worker = spawn(&waiter, move |t| {
            mutex.acquire(t);
            let owned = mutex.owner().is_some_and(|o| Arc::ptr_eq(&o, t));
            mutex.release(t);
            owned
        });
        wait_until_blocked(&waiter);
        assert!(waiter.is_waiting_on(mutex.queue()));

        mutex.release(&owner);
        assert!(worker.join().unwrap());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_mutex_timed_uncontended_ignores_timeout() {
        let system = test_system(1);
        let thread = system.create_thread("t", Priority::NORMAL, 0);
        let mutex = Mutex::new();

        let far = Timespec::new(i64::MAX, 0);
        assert_eq!(mutex.acquire_timed(&thread, Some(&far)), Ok(()));
        mutex.release(&thread);
        assert_eq!(mutex.acquire_timed(&thread, None), Ok(()));
        mutex.release(&thread);
    }

    #[test]
    fn test_mutex_timeout_drops_inherited_priority() {
        let system = test_system(1);
        let owner = system.create_thread("owner", Priority::LOW, 0);
        let waiter = system.create_thread("waiter", Priority::HIGH, 0);
        owner.start();
        let mutex: &'static Mutex = Box::leak(Box::new(Mutex::new()));

        mutex.acquire(&owner);
        let worker = spawn(&waiter, move |t| {
            let deadline = arch::port().now().add_nanos(50_000_000);
            mutex.acquire_timed(t, Some(&deadline))
        });
        wait_until_blocked(&waiter);
        assert_eq!(owner.priority(), Priority::HIGH);

        assert_eq!(worker.join().unwrap(), Err(Errno::ETIMEDOUT));
        assert_eq!(owner.priority(), Priority::LOW);
        assert!(Arc::ptr_eq(&mutex.owner().unwrap(), &owner));
        mutex.release(&owner);
    }
}
