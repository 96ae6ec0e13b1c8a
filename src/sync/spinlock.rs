// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Ticket Lock Implementation
//!
//! This module provides the SMP lock used by every thread queue and by the
//! per-CPU control records. A ticket lock is strictly fair: processors are
//! served in the order they drew their ticket.
//!
//! # Design
//!
//! - `next_ticket`: incremented by every acquirer, the drawn value is its ticket
//! - `now_serving`: the ticket currently allowed to hold the lock
//!
//! The lock never suspends. It is held only across short bookkeeping and
//! never across a thread suspension. Callers that may race with interrupt
//! handlers on the same processor disable interrupts first (see
//! [`crate::arch::IsrGuard`]).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A fair ticket lock
pub struct TicketLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TicketLock<T> {}
unsafe impl<T: Send> Sync for TicketLock<T> {}

impl<T> TicketLock<T> {
    /// Create a new, unlocked ticket lock
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning until our ticket is served
    pub fn lock(&self) -> TicketLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
        TicketLockGuard { lock: self, ticket }
    }

    /// Try to acquire the lock without spinning
    ///
    /// Succeeds only if nobody holds or waits for the lock.
    pub fn try_lock(&self) -> Option<TicketLockGuard<'_, T>> {
        let serving = self.now_serving.load(Ordering::Relaxed);
        self.next_ticket
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|ticket| TicketLockGuard { lock: self, ticket })
    }

    /// Check if the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Number of processors holding or waiting for the lock
    pub fn contention(&self) -> u32 {
        self.next_ticket
            .load(Ordering::Relaxed)
            .wrapping_sub(self.now_serving.load(Ordering::Relaxed))
    }
}

impl<T: Default> Default for TicketLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for a TicketLock
///
/// Dropping the guard serves the next ticket.
pub struct TicketLockGuard<'a, T> {
    lock: &'a TicketLock<T>,
    ticket: u32,
}

impl<'a, T> Drop for TicketLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock
            .now_serving
            .store(self.ticket.wrapping_add(1), Ordering::Release);
    }
}

impl<'a, T> Deref for TicketLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for TicketLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

// ============================================================================
// Tests
// ============================================================================
