// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Synchronization Primitives
//!
//! # Primitives
//!
//! - **TicketLock**: FIFO spin lock guarding every queue and ready queue
//! - **ThreadQueue**: Blocked threads of one object, with priority inheritance
//! - **Mutex** and **RecursiveMutex**: Owned, priority-inheriting locks
//! - **Condition**: Condition variable bound to a mutex per wait
//! - **Semaphore**: Counting semaphore
//! - **Futex**: Compare-and-block on a caller-owned word
//!
//! All blocking objects have a `const` constructor and can be placed in
//! statics. A freshly constructed object is unowned and has no waiters.

pub mod condvar;
pub mod futex;
pub mod mutex;
pub mod recursive;
pub mod semaphore;
pub mod spinlock;
pub mod wait_queue;

// Re-exports
pub use condvar::Condition;
pub use futex::Futex;
pub use mutex::Mutex;
pub use recursive::RecursiveMutex;
pub use semaphore::Semaphore;
pub use spinlock::{TicketLock, TicketLockGuard};
pub use wait_queue::{DeadlockPolicy, Discipline, QueueContext, QueueGuard, ThreadQueue};
