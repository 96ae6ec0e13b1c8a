// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread representation and management
//!
//! A [`Thread`] is the control block the synchronization core operates
//! on. It is shared as a [`ThreadRef`] between the scheduler, the per-CPU
//! control records and any thread queue it waits on.
//!
//! # Blocking
//!
//! A thread blocks in two steps. Under the queue lock it is inserted and
//! its wait flags become `INTEND_TO_BLOCK`. After the queue lock is
//! released it leaves the scheduler and tries `INTEND_TO_BLOCK -> BLOCKED`.
//! A waker that gets there first turns the flags into `READY_AGAIN` and
//! the blocker simply continues; otherwise the waker owns the unblock.
//!
//! # Priority
//!
//! The effective priority is `max(base, inherited...)`, where each owned
//! priority-inheriting queue contributes its highest waiter priority. It
//! is recomputed from scratch whenever a contribution changes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::dispatch::DispatchGuard;
use super::percpu::PerCpu;
use super::state::{Priority, ThreadStates, WaitFlags};
use crate::arch;
use crate::status::Status;
use crate::sync::spinlock::TicketLock;
use crate::sync::wait_queue::ThreadQueue;
use crate::system::System;
use crate::time::Timespec;
use crate::traits::SuspendOutcome;

/// Shared thread reference
pub type ThreadRef = Arc<Thread>;

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new thread ID
pub fn new_thread_id() -> ThreadId {
    ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
}

/// Priority contributed by one owned priority-inheriting queue
#[derive(Debug, Clone, Copy)]
struct Contribution {
    queue: usize,
    priority: Priority,
}

/// Thread control block
pub struct Thread {
    id: ThreadId,
    name: &'static str,
    system: &'static System,
    cpu: usize,

    base_priority: AtomicU32,
    priority: AtomicU32,
    inherited: TicketLock<Vec<Contribution>>,

    /// Serializes state changes with the scheduler operations they imply
    state_lock: TicketLock<()>,
    state: AtomicU32,

    wait_flags: AtomicU32,
    wait_status: AtomicU8,
    wait_queue: AtomicPtr<ThreadQueue>,

    /// Number of mutexes owned
    resource_count: AtomicU32,
}

impl Thread {
    pub(crate) fn new(
        system: &'static System,
        name: &'static str,
        priority: Priority,
        cpu: usize,
    ) -> Self {
        Self {
            id: new_thread_id(),
            name,
            system,
            cpu,
            base_priority: AtomicU32::new(priority.0),
            priority: AtomicU32::new(priority.0),
            inherited: TicketLock::new(Vec::new()),
            state_lock: TicketLock::new(()),
            state: AtomicU32::new(ThreadStates::DORMANT.bits()),
            wait_flags: AtomicU32::new(WaitFlags::empty().bits()),
            wait_status: AtomicU8::new(Status::Successful as u8),
            wait_queue: AtomicPtr::new(ptr::null_mut()),
            resource_count: AtomicU32::new(0),
        }
    }

    /// Get the thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get the thread name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Index of the home processor
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// The system this thread belongs to
    pub fn system(&self) -> &'static System {
        self.system
    }

    /// Per-CPU control of the home processor
    pub fn home(&self) -> &'static PerCpu {
        self.system.cpu(self.cpu)
    }

    /// Disable thread dispatching on the calling processor
    ///
    /// A remote home processor is not touched. It switches at the
    /// interrupt raised by [`PerCpu::update_heir`].
    pub fn dispatch_disable(&self) -> DispatchGuard<'static> {
        self.system.dispatch_disable()
    }

    /// Effective priority, including inherited priority
    pub fn priority(&self) -> Priority {
        Priority(self.priority.load(Ordering::Acquire))
    }

    /// Base priority
    pub fn base_priority(&self) -> Priority {
        Priority(self.base_priority.load(Ordering::Acquire))
    }

    /// Current state bits
    pub fn state(&self) -> ThreadStates {
        ThreadStates::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    /// Whether the thread may be scheduled
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Current wait flags
    pub fn wait_flags(&self) -> WaitFlags {
        WaitFlags::from_bits_truncate(self.wait_flags.load(Ordering::Acquire))
    }

    /// Whether the thread completed the block handshake and is still waiting
    pub fn is_blocked(&self) -> bool {
        self.wait_flags() == WaitFlags::BLOCKED
    }

    /// Outcome of the last wait
    pub fn wait_status(&self) -> Status {
        Status::from_raw(self.wait_status.load(Ordering::Acquire))
    }

    /// Whether the thread currently waits on `queue`
    pub fn is_waiting_on(&self, queue: &ThreadQueue) -> bool {
        ptr::eq(self.wait_queue.load(Ordering::Acquire), queue)
    }

    /// Number of mutexes owned
    pub fn resource_count(&self) -> u32 {
        self.resource_count.load(Ordering::Relaxed)
    }

    pub(crate) fn acquired_resource(&self) {
        self.resource_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn released_resource(&self) {
        self.resource_count.fetch_sub(1, Ordering::Relaxed);
    }

    // ========================================================================
    // State changes
    // ========================================================================

    /// Add state bits, leaving the scheduler if the thread was ready
    ///
    /// # Returns
    /// * The previous state
    pub fn set_state(self: &ThreadRef, bits: ThreadStates) -> ThreadStates {
        let _dispatch = self.dispatch_disable();
        let _state = self.state_lock.lock();
        let previous = ThreadStates::from_bits_truncate(self.state.fetch_or(bits.bits(), Ordering::AcqRel));
        if previous.is_ready() && !bits.is_empty() {
            self.system.scheduler().block(self.home(), self);
        }
        previous
    }

    /// Clear state bits, entering the scheduler if the thread became ready
    ///
    /// # Returns
    /// * The previous state
    pub fn clear_state(self: &ThreadRef, bits: ThreadStates) -> ThreadStates {
        let _dispatch = self.dispatch_disable();
        let _state = self.state_lock.lock();
        let previous = ThreadStates::from_bits_truncate(self.state.fetch_and(!bits.bits(), Ordering::AcqRel));
        if !previous.is_ready() && previous.difference(bits).is_ready() {
            self.system.scheduler().unblock(self.home(), self);
        }
        previous
    }

    /// Start a dormant thread
    pub fn start(self: &ThreadRef) -> bool {
        let previous = self.clear_state(ThreadStates::DORMANT);
        let started = previous.contains(ThreadStates::DORMANT);
        if started {
            log::debug!("thread {} ({}) started on cpu{}", self.id, self.name, self.cpu);
        }
        started
    }

    // ========================================================================
    // Priority
    // ========================================================================

    /// Change the base priority
    ///
    /// The new effective priority reaches the scheduler and every owner
    /// this thread is waiting behind.
    pub fn set_base_priority(self: &ThreadRef, priority: Priority) {
        self.base_priority.store(priority.0, Ordering::Release);
        let changed = {
            let inherited = self.inherited.lock();
            self.recompute_priority(&inherited)
        };
        if changed {
            self.propagate_priority();
        }
    }

    /// Set or remove the contribution of an owned priority-inheriting queue
    ///
    /// # Returns
    /// * `true` if the effective priority changed
    pub(crate) fn set_inherited(&self, queue: usize, priority: Option<Priority>) -> bool {
        let mut inherited = self.inherited.lock();
        let pos = inherited.iter().position(|c| c.queue == queue);
        match (pos, priority) {
            (Some(pos), Some(priority)) => inherited[pos].priority = priority,
            (Some(pos), None) => {
                inherited.swap_remove(pos);
            }
            (None, Some(priority)) => inherited.push(Contribution { queue, priority }),
            (None, None) => return false,
        }
        self.recompute_priority(&inherited)
    }

    fn recompute_priority(&self, inherited: &[Contribution]) -> bool {
        let effective = inherited
            .iter()
            .map(|c| c.priority)
            .fold(self.base_priority(), Priority::max);
        self.priority.swap(effective.0, Ordering::AcqRel) != effective.0
    }

    /// Push a changed effective priority to the scheduler and along the
    /// chain of owners this thread waits behind
    pub(crate) fn propagate_priority(self: &ThreadRef) {
        let mut thread = self.clone();
        loop {
            {
                let _dispatch = thread.dispatch_disable();
                let _state = thread.state_lock.lock();
                if thread.is_ready() {
                    thread.system.scheduler().update_priority(thread.home(), &thread);
                }
            }

            let queue = thread.wait_queue.load(Ordering::Acquire);
            if queue.is_null() {
                break;
            }
            // The queue outlives every thread enqueued on it.
            let queue = unsafe { &*queue };
            match queue.reposition(&thread) {
                Some(owner) => thread = owner,
                None => break,
            }
        }
    }

    // ========================================================================
    // Block and wakeup
    // ========================================================================

    /// Enter a wait on `queue`, called under the queue lock
    pub(crate) fn prepare_wait(&self, queue: &ThreadQueue) {
        self.wait_status.store(Status::Successful as u8, Ordering::Relaxed);
        self.wait_queue
            .store(queue as *const ThreadQueue as *mut ThreadQueue, Ordering::Release);
        self.wait_flags
            .store(WaitFlags::INTEND_TO_BLOCK.bits(), Ordering::Release);
    }

    fn try_change_wait_flags(&self, expected: WaitFlags, desired: WaitFlags) -> bool {
        self.wait_flags
            .compare_exchange(expected.bits(), desired.bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// End the wait with `status`, called under the queue lock after the
    /// thread was removed from it
    ///
    /// # Returns
    /// * `true` if the thread already blocked and the caller must unblock it
    pub(crate) fn make_ready_again(&self, status: Status) -> bool {
        self.wait_status.store(status as u8, Ordering::Release);
        self.wait_queue.store(ptr::null_mut(), Ordering::Release);
        if self.try_change_wait_flags(WaitFlags::INTEND_TO_BLOCK, WaitFlags::READY_AGAIN) {
            return false;
        }
        self.wait_flags
            .store(WaitFlags::READY_AGAIN.bits(), Ordering::Release);
        true
    }

    /// Unblock a thread that completed the block handshake
    pub(crate) fn unblock(self: &ThreadRef) {
        self.clear_state(ThreadStates::BLOCKED);
        arch::port().resume(self);
    }

    /// Block the calling thread after it was enqueued on `queue`
    ///
    /// `dispatch` was taken while the queue lock was held. Dropping it lets
    /// the processor switch away.
    pub(crate) fn block(
        self: &ThreadRef,
        queue: &ThreadQueue,
        state: ThreadStates,
        deadline: Option<Timespec>,
        dispatch: DispatchGuard<'_>,
    ) -> Status {
        self.set_state(state);
        if !self.try_change_wait_flags(WaitFlags::INTEND_TO_BLOCK, WaitFlags::BLOCKED) {
            // Satisfied before the handshake completed
            self.clear_state(ThreadStates::BLOCKED);
        }
        drop(dispatch);

        // A waker that found us BLOCKED still has to clear the state, and
        // it must not clear the state of our next wait.
        let port = arch::port();
        let mut deadline = deadline;
        while !self.wait_flags().contains(WaitFlags::READY_AGAIN)
            || self.state().intersects(ThreadStates::BLOCKED)
        {
            if port.suspend(self, deadline) == SuspendOutcome::DeadlineExpired {
                queue.timeout(self);
                // Off the queue now, whoever removed us resumes us
                deadline = None;
            }
        }
        self.wait_status()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cpu", &self.cpu)
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        arch::port().thread_deleted(self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
