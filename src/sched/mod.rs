// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Threads, per-CPU control and dispatch
//!
//! # Example
//! ```ignore
//! use supercore::{Config, Priority, System};
//!
//! let system = System::init(Config::uniprocessor())?;
//! let idle = system.create_thread("idle", Priority::IDLE, 0);
//! idle.start();
//! system.request_start_multitasking();
//! system.start_multitasking(0);
//! ```

pub mod dispatch;
pub mod percpu;
pub mod scheduler;
pub mod smp;
pub mod state;
pub mod thread;

pub use dispatch::DispatchGuard;
pub use percpu::{PerCpu, PerCpuState, PerCpuStats, SmpMessage};
pub use scheduler::{PriorityScheduler, Scheduler};
pub use smp::{Job, JobHandler};
pub use state::{Priority, RunQueue, ThreadStates, WaitFlags};
pub use thread::{Thread, ThreadId, ThreadRef};
