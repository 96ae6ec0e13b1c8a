// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Queue Implementation
//!
//! The thread queue is the blocking substrate of every synchronization
//! object. It holds the threads waiting for the object in discipline
//! order, the optional owner of the object, and a ticket lock protecting
//! both.
//!
//! # Design
//!
//! - The queue lock is taken together with interrupts disabled through a
//!   [`QueueGuard`]. All bookkeeping happens under the guard.
//! - A thread is removed from the queue and its wait status set under the
//!   lock. Threads that already blocked are unblocked after the lock is
//!   dropped, with thread dispatching disabled across all of them.
//! - The lock is never held while a thread is suspended.
//! - For [`Discipline::PriorityInherit`] the owner inherits the priority of
//!   the first waiter. The contribution is recomputed from the queue
//!   contents after every change.
//!
//! # Usage
//!
//! ```ignore
//! static QUEUE: ThreadQueue = ThreadQueue::new("example", Discipline::Fifo);
//!
//! // Waiter
//! let status = QUEUE.acquire().enqueue(&executing, QueueContext::new(ThreadStates::WAITING_FOR_FUTEX));
//!
//! // Waker
//! QUEUE.acquire().extract_first(Status::Successful);
//! ```

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::{self, IsrGuard};
use crate::fatal::{FatalError, InternalError};
use crate::sched::state::ThreadStates;
use crate::sched::thread::{Thread, ThreadRef};
use crate::status::Status;
use crate::sync::spinlock::{TicketLock, TicketLockGuard};
use crate::time::{self, Timespec};

/// Order in which waiters are granted the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Arrival order
    Fifo,
    /// Descending effective priority, arrival order among equals
    Priority,
    /// Priority order, and the owner inherits the first waiter's priority
    PriorityInherit,
}

impl Discipline {
    fn is_priority(self) -> bool {
        !matches!(self, Discipline::Fifo)
    }
}

/// What happens when a thread enqueues on a queue it owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockPolicy {
    /// Return [`Status::Deadlock`] to the caller
    Status,
    /// Terminate with [`InternalError::ThreadQueueDeadlock`]
    Fatal,
}

/// Parameters of one enqueue
pub struct QueueContext<'a> {
    state: ThreadStates,
    deadline: Option<&'a Timespec>,
    deadlock: DeadlockPolicy,
    callout: Option<&'a dyn Fn()>,
}

impl<'a> QueueContext<'a> {
    /// Wait forever in `state`, deadlocks are fatal
    pub fn new(state: ThreadStates) -> Self {
        Self {
            state,
            deadline: None,
            deadlock: DeadlockPolicy::Fatal,
            callout: None,
        }
    }

    /// Wait until an absolute deadline, `None` waits forever
    pub fn with_deadline(mut self, deadline: Option<&'a Timespec>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Select the deadlock policy
    pub fn with_deadlock(mut self, policy: DeadlockPolicy) -> Self {
        self.deadlock = policy;
        self
    }

    /// Run `callout` after the thread is enqueued and the queue lock is
    /// released, right before the thread blocks
    pub fn with_callout(mut self, callout: &'a dyn Fn()) -> Self {
        self.callout = Some(callout);
        self
    }
}

/// Queue contents, protected by the queue lock
struct Heads {
    waiters: VecDeque<ThreadRef>,
    owner: Option<ThreadRef>,
    deleted: bool,
}

impl Heads {
    fn insert(&mut self, thread: ThreadRef, discipline: Discipline) {
        if discipline.is_priority() {
            let priority = thread.priority();
            let pos = self
                .waiters
                .iter()
                .position(|w| w.priority() < priority)
                .unwrap_or(self.waiters.len());
            self.waiters.insert(pos, thread);
        } else {
            self.waiters.push_back(thread);
        }
    }

    fn position(&self, thread: &Thread) -> Option<usize> {
        self.waiters
            .iter()
            .position(|w| core::ptr::eq(Arc::as_ptr(w), thread))
    }

    fn remove(&mut self, thread: &Thread) -> Option<ThreadRef> {
        let pos = self.position(thread)?;
        self.waiters.remove(pos)
    }
}

/// A queue of threads waiting for one object
pub struct ThreadQueue {
    heads: TicketLock<Heads>,
    discipline: Discipline,
    name: &'static str,
}

impl ThreadQueue {
    /// Create an empty, unlocked, unowned queue
    pub const fn new(name: &'static str, discipline: Discipline) -> Self {
        Self {
            heads: TicketLock::new(Heads {
                waiters: VecDeque::new(),
                owner: None,
                deleted: false,
            }),
            discipline,
            name,
        }
    }

    /// Diagnostic name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue discipline
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Disable interrupts and take the queue lock
    pub fn acquire(&self) -> QueueGuard<'_> {
        let isr = IsrGuard::new();
        QueueGuard {
            queue: self,
            heads: Some(self.heads.lock()),
            isr: Some(isr),
            unblock: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Check if no thread waits
    pub fn is_empty(&self) -> bool {
        self.acquire().is_empty()
    }

    /// Number of waiting threads
    pub fn len(&self) -> usize {
        self.acquire().len()
    }

    /// The thread that would be granted the object next
    pub fn first(&self) -> Option<ThreadRef> {
        self.acquire().first().cloned()
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadRef> {
        self.acquire().owner().cloned()
    }

    /// Remove a specific thread, ending its wait with `status`
    pub fn extract(&self, thread: &ThreadRef, status: Status) -> bool {
        self.acquire().extract(thread, status)
    }

    /// Remove all threads, ending their waits with `status`
    ///
    /// # Returns
    /// * The number of threads removed
    pub fn flush(&self, status: Status) -> usize {
        self.acquire().flush(usize::MAX, status)
    }

    /// Destroy the queue
    ///
    /// The queue must be empty and unowned. Later enqueues fail with
    /// [`Status::Unavailable`].
    pub fn destroy(&self) {
        let mut guard = self.acquire();
        if !guard.is_empty() || guard.owner().is_some() {
            log::warn!("thread queue {}: destroyed while in use", self.name);
        }
        guard.heads_mut().deleted = true;
    }

    /// Reset a destroyed queue to its initial state
    pub fn reinitialize(&self) {
        let mut guard = self.acquire();
        let heads = guard.heads_mut();
        heads.waiters.clear();
        heads.owner = None;
        heads.deleted = false;
    }

    fn key(&self) -> usize {
        self as *const ThreadQueue as usize
    }

    /// Re-sort a waiter after its priority changed
    ///
    /// # Returns
    /// * The owner, if its effective priority changed as a result
    pub(crate) fn reposition(&self, thread: &ThreadRef) -> Option<ThreadRef> {
        let discipline = self.discipline;
        if !discipline.is_priority() {
            return None;
        }
        let mut guard = self.acquire();
        let heads = guard.heads_mut();
        let waiter = heads.remove(thread)?;
        heads.insert(waiter, discipline);
        let owner = heads.owner.clone()?;
        if discipline == Discipline::PriorityInherit
            && owner.set_inherited(self.key(), heads.waiters.front().map(|w| w.priority()))
        {
            return Some(owner);
        }
        None
    }

    /// The deadline of a waiting thread passed
    pub(crate) fn timeout(&self, thread: &ThreadRef) {
        let mut guard = self.acquire();
        let Some(waiter) = guard.heads_mut().remove(thread) else {
            // A waker was faster
            return;
        };
        log::debug!("thread queue {}: {} timed out", self.name, thread.name());
        let blocked = waiter.make_ready_again(Status::Timeout);
        guard.refresh_inheritance();
        drop(guard);
        if blocked {
            thread.clear_state(ThreadStates::BLOCKED);
        }
    }
}

/// Locked access to a [`ThreadQueue`]
///
/// Dropping the guard releases the lock, restores the interrupt level,
/// unblocks the threads made ready and propagates priority changes.
pub struct QueueGuard<'a> {
    queue: &'a ThreadQueue,
    heads: Option<TicketLockGuard<'a, Heads>>,
    isr: Option<IsrGuard>,
    unblock: Vec<ThreadRef>,
    changed: Vec<ThreadRef>,
}

impl<'a> QueueGuard<'a> {
    fn heads(&self) -> &Heads {
        match &self.heads {
            Some(heads) => heads,
            None => unreachable!("thread queue guard used after release"),
        }
    }

    fn heads_mut(&mut self) -> &mut Heads {
        match &mut self.heads {
            Some(heads) => heads,
            None => unreachable!("thread queue guard used after release"),
        }
    }

    /// The locked queue
    pub fn queue(&self) -> &'a ThreadQueue {
        self.queue
    }

    /// Check if no thread waits
    pub fn is_empty(&self) -> bool {
        self.heads().waiters.is_empty()
    }

    /// Number of waiting threads
    pub fn len(&self) -> usize {
        self.heads().waiters.len()
    }

    /// The thread that would be granted the object next
    pub fn first(&self) -> Option<&ThreadRef> {
        self.heads().waiters.front()
    }

    /// Current owner
    pub fn owner(&self) -> Option<&ThreadRef> {
        self.heads().owner.as_ref()
    }

    /// Check if `thread` owns the queue
    pub fn is_owner(&self, thread: &Thread) -> bool {
        self.owner()
            .is_some_and(|owner| core::ptr::eq(Arc::as_ptr(owner), thread))
    }

    /// Change the owner
    ///
    /// For priority-inheriting queues the old owner loses and the new
    /// owner gains the contribution of this queue.
    pub fn set_owner(&mut self, owner: Option<ThreadRef>) {
        let key = self.queue.key();
        let inherit = self.queue.discipline == Discipline::PriorityInherit;
        let previous = core::mem::replace(&mut self.heads_mut().owner, owner);
        if inherit {
            if let Some(previous) = previous {
                if previous.set_inherited(key, None) {
                    self.note_changed(previous);
                }
            }
            self.refresh_inheritance();
        }
    }

    fn note_changed(&mut self, thread: ThreadRef) {
        if !self.changed.iter().any(|t| Arc::ptr_eq(t, &thread)) {
            self.changed.push(thread);
        }
    }

    /// Recompute the owner's contribution from the first waiter
    fn refresh_inheritance(&mut self) {
        if self.queue.discipline != Discipline::PriorityInherit {
            return;
        }
        let key = self.queue.key();
        let heads = self.heads();
        let Some(owner) = heads.owner.clone() else {
            return;
        };
        let top = heads.waiters.front().map(|w| w.priority());
        if owner.set_inherited(key, top) {
            self.note_changed(owner);
        }
    }

    fn ready_again(&mut self, thread: &ThreadRef, status: Status) {
        if thread.make_ready_again(status) {
            self.unblock.push(thread.clone());
        }
    }

    /// Remove the first waiter, ending its wait with `status`
    pub fn extract_first(&mut self, status: Status) -> Option<ThreadRef> {
        let thread = self.heads_mut().waiters.pop_front()?;
        self.ready_again(&thread, status);
        self.refresh_inheritance();
        Some(thread)
    }

    /// Remove a specific waiter, ending its wait with `status`
    pub fn extract(&mut self, thread: &ThreadRef, status: Status) -> bool {
        let Some(thread) = self.heads_mut().remove(thread) else {
            return false;
        };
        self.ready_again(&thread, status);
        self.refresh_inheritance();
        true
    }

    /// Remove up to `max` waiters in queue order
    ///
    /// # Returns
    /// * The number of threads removed
    pub fn flush(&mut self, max: usize, status: Status) -> usize {
        let mut count = 0;
        while count < max {
            let Some(thread) = self.heads_mut().waiters.pop_front() else {
                break;
            };
            self.ready_again(&thread, status);
            count += 1;
        }
        if count > 0 {
            self.refresh_inheritance();
        }
        count
    }

    /// Enqueue the executing thread and block it
    ///
    /// Consumes the guard, the lock is released before the thread blocks.
    ///
    /// # Returns
    /// * The status the wait ended with
    /// * [`Status::Unavailable`] if the queue was destroyed
    /// * [`Status::InvalidNumber`] or [`Status::Timeout`] for a malformed or
    ///   elapsed deadline, without blocking and without running the callout
    /// * [`Status::Deadlock`] if the thread owns the queue and the context
    ///   asks for a status instead of a fatal error
    pub fn enqueue(mut self, executing: &ThreadRef, context: QueueContext<'_>) -> Status {
        let queue = self.queue;
        if self.heads().deleted {
            return Status::Unavailable;
        }
        if self.is_owner(executing) {
            match context.deadlock {
                DeadlockPolicy::Status => return Status::Deadlock,
                DeadlockPolicy::Fatal => {
                    drop(self);
                    executing
                        .system()
                        .fatal(FatalError::Internal(InternalError::ThreadQueueDeadlock));
                }
            }
        }
        let deadline = match time::check_deadline(context.deadline, arch::port().now()) {
            Ok(deadline) => deadline,
            Err(status) => return status,
        };

        self.heads_mut().insert(executing.clone(), queue.discipline);
        executing.prepare_wait(queue);
        self.refresh_inheritance();
        log::debug!(
            "thread queue {}: {} waits ({} waiting)",
            queue.name,
            executing.name(),
            self.len()
        );

        let dispatch = executing.dispatch_disable();
        drop(self);
        if let Some(callout) = context.callout {
            callout();
        }
        executing.block(queue, context.state, deadline, dispatch)
    }
}

impl<'a> Drop for QueueGuard<'a> {
    fn drop(&mut self) {
        drop(self.heads.take());
        drop(self.isr.take());

        if let Some(first) = self.unblock.first() {
            let system = first.system();
            let _dispatch = system.dispatch_disable();
            for thread in self.unblock.drain(..) {
                thread.unblock();
            }
        }
        for thread in self.changed.drain(..) {
            thread.propagate_priority();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
