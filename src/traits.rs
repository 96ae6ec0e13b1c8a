// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Processor port traits
//!
//! The synchronization core is architecture independent. Everything it
//! needs from the processor goes through [`CpuPort`]:
//!
//! - x86_64: `RFLAGS.IF`, x2APIC inter-processor interrupts, TSC
//! - hosted: emulated interrupt level, std threads parked on condvars
//!
//! A port is installed once with [`crate::arch::install`].

use crate::sched::thread::{Thread, ThreadId};
use crate::time::Timespec;

/// Saved interrupt level, returned by [`CpuPort::disable_interrupts`]
///
/// Opaque to the core. Restoring it re-enables interrupts only if they
/// were enabled when the level was saved, so nested sections work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsrLevel(pub usize);

/// How a suspended thread came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendOutcome {
    /// [`CpuPort::resume`] was called for the thread (or spuriously woken)
    Resumed,
    /// The deadline passed before a resume arrived
    DeadlineExpired,
}

/// Trait for processor-specific operations
pub trait CpuPort: Sync {
    /// Disable interrupts on the current processor
    ///
    /// # Returns
    /// * The previous level, to be passed to [`CpuPort::restore_interrupts`]
    fn disable_interrupts(&self) -> IsrLevel;

    /// Restore a level saved by [`CpuPort::disable_interrupts`]
    fn restore_interrupts(&self, level: IsrLevel);

    /// Check if interrupts are enabled on the current processor
    fn interrupts_enabled(&self) -> bool;

    /// Index of the processor executing the caller
    fn current_processor(&self) -> usize;

    /// Raise an inter-processor interrupt on the given processor
    fn send_ipi(&self, index: usize);

    /// Current absolute time of the clock used by timed waits
    fn now(&self) -> Timespec;

    /// Suspend the calling thread until resumed or until `deadline`
    ///
    /// May return `Resumed` spuriously. The caller re-checks its wait
    /// flags and suspends again if it is still blocked.
    fn suspend(&self, thread: &Thread, deadline: Option<Timespec>) -> SuspendOutcome;

    /// Resume a thread suspended by [`CpuPort::suspend`]
    ///
    /// A resume that arrives before the suspend must not be lost.
    fn resume(&self, thread: &Thread);

    /// Switch the processor from one thread context to another
    ///
    /// Ports whose threads carry their own execution context (the hosted
    /// port) have nothing to do here.
    fn context_switch(&self, _cpu: usize, _from: Option<&Thread>, _to: Option<&Thread>) {}

    /// A thread went away, drop any per-thread port state
    fn thread_deleted(&self, _id: ThreadId) {}

    /// Hint issued in busy-wait loops that wait for another processor
    fn processor_event_wait(&self) {
        core::hint::spin_loop();
    }
}
