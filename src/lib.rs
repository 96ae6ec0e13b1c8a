// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! # Supercore - Synchronization and Dispatch Core for SMP Kernels
//!
//! Supercore is the part of a real-time kernel that makes threads wait and
//! wakes them up again. It provides:
//!
//! - **Thread queues**: FIFO and priority ordered, with priority inheritance
//! - **Blocking objects**: mutex, recursive mutex, condition variable,
//!   counting semaphore and futex
//! - **Thread dispatch**: per-CPU heir selection, deferred context switches
//!   and a thread dispatch disable level
//! - **SMP control**: processor start-up state machine, inter-processor
//!   messages and per-CPU jobs
//!
//! ## Architecture
//!
//! ```text
//! src/
//! ├── arch/              # Processor ports (amd64, hosted)
//! ├── sched/             # Threads, per-CPU control, dispatch, SMP
//! ├── sync/              # Ticket lock, thread queues, blocking objects
//! ├── system.rs          # Per-system arena
//! └── lib.rs             # This file
//! ```
//!
//! ## Processor Port
//!
//! Everything hardware specific goes through the [`CpuPort`] trait:
//! interrupt masking, processor index, clock, inter-processor interrupts
//! and suspending a blocked thread.
//!
//! - **x86_64**: [`arch::amd64::Amd64Port`] (`amd64` feature)
//! - **Hosted**: [`arch::host::HostPort`] on std threads (`std` feature)
//!
//! ## Using a Mutex
//!
//! ```ignore
//! use supercore::{Config, Mutex, Priority, System};
//!
//! static LOCK: Mutex = Mutex::new();
//!
//! let system = System::init(Config::smp(4))?;
//! let thread = system.create_thread("worker", Priority::NORMAL, 1);
//! LOCK.acquire(&thread);
//! LOCK.release(&thread);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Alloc crate for heap allocations
extern crate alloc;

// Core traits and types
pub mod traits;

// Processor ports
pub mod arch;

// Configuration, status codes and time
pub mod config;
pub mod status;
pub mod time;

// Fatal error handling and logging
pub mod fatal;
pub mod logging;

// Threads, dispatch and SMP
pub mod sched;

// Synchronization primitives
pub mod sync;

// Per-system state
pub mod system;

// Integration tests
#[cfg(test)]
mod tests;

pub use config::{Config, ConfigError, MAX_PROCESSORS};
pub use fatal::{FatalError, FatalHandler, InternalError, SmpFatal};
pub use sched::{PerCpu, PerCpuState, Priority, Thread, ThreadId, ThreadRef};
pub use status::{Errno, Status};
pub use sync::{Condition, Futex, Mutex, RecursiveMutex, Semaphore, ThreadQueue};
pub use system::System;
pub use time::Timespec;
pub use traits::CpuPort;
