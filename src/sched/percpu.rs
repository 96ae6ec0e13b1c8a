// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-CPU control
//!
//! One [`PerCpu`] record exists for every configured processor. The
//! records live in the arena owned by [`crate::System`] and are addressed
//! by processor index, never by pointers handed across processors.
//!
//! Most fields are written by their own processor. The exceptions are the
//! heir (set by scheduler decisions made anywhere, under the slot lock),
//! the processor state (changed under the system state lock) and the
//! message bits (atomic OR by the sender).

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use bitflags::bitflags;

use super::smp::Job;
use super::thread::ThreadRef;
use crate::sync::spinlock::TicketLock;

/// Processor state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerCpuState {
    /// The processor is not yet initialized
    Initial = 0,
    /// Initialized, waiting for the start request of the boot processor
    ReadyToStartMultitasking = 1,
    /// The boot processor asked this processor to start multitasking
    RequestStartMultitasking = 2,
    /// Multitasking
    Up = 3,
    /// Halted, terminal
    Shutdown = 4,
}

impl PerCpuState {
    pub(crate) const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => PerCpuState::Initial,
            1 => PerCpuState::ReadyToStartMultitasking,
            2 => PerCpuState::RequestStartMultitasking,
            3 => PerCpuState::Up,
            _ => PerCpuState::Shutdown,
        }
    }
}

bitflags! {
    /// Inter-processor message bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SmpMessage: u32 {
        /// Shut the processor down
        const SHUTDOWN = 1 << 0;
        /// Test message, only counted
        const TEST = 1 << 1;
        /// Perform the queued per-CPU jobs
        const PERFORM_JOBS = 1 << 2;
    }
}

/// Per-CPU statistics
#[derive(Debug, Default)]
pub struct PerCpuStats {
    /// Context switches performed
    pub context_switches: AtomicU64,
    /// Dispatch requests that had to wait for a later opportunity
    pub deferred_dispatches: AtomicU64,
    /// Interrupts entered
    pub interrupts: AtomicU64,
    /// Inter-processor messages processed
    pub messages: AtomicU64,
}

/// Executing and heir thread
#[derive(Default)]
pub(crate) struct Slots {
    pub(crate) executing: Option<ThreadRef>,
    pub(crate) heir: Option<ThreadRef>,
}

/// Per-CPU control record
pub struct PerCpu {
    index: usize,
    pub(crate) slots: TicketLock<Slots>,
    pub(crate) dispatch_necessary: AtomicBool,
    pub(crate) isr_nest_level: AtomicU32,
    pub(crate) thread_dispatch_disable_level: AtomicU32,
    state: AtomicU8,
    online: AtomicBool,
    message: AtomicU32,
    pub(crate) jobs: TicketLock<VecDeque<Arc<Job>>>,
    stats: PerCpuStats,
}

impl PerCpu {
    /// Create the record of processor `index`, all fields zero
    pub fn new(index: usize) -> Self {
        Self {
            index,
            slots: TicketLock::new(Slots::default()),
            dispatch_necessary: AtomicBool::new(false),
            isr_nest_level: AtomicU32::new(0),
            thread_dispatch_disable_level: AtomicU32::new(0),
            state: AtomicU8::new(PerCpuState::Initial as u8),
            online: AtomicBool::new(false),
            message: AtomicU32::new(0),
            jobs: TicketLock::new(VecDeque::new()),
            stats: PerCpuStats::default(),
        }
    }

    /// Processor index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Currently executing thread, `None` while idle
    pub fn executing(&self) -> Option<ThreadRef> {
        self.slots.lock().executing.clone()
    }

    /// Thread selected to execute next
    pub fn heir(&self) -> Option<ThreadRef> {
        self.slots.lock().heir.clone()
    }

    /// Whether a context switch is pending
    pub fn is_dispatch_necessary(&self) -> bool {
        self.dispatch_necessary.load(Ordering::Acquire)
    }

    /// Interrupt nesting depth
    pub fn isr_nest_level(&self) -> u32 {
        self.isr_nest_level.load(Ordering::Acquire)
    }

    /// Thread dispatch disable depth
    pub fn dispatch_disable_level(&self) -> u32 {
        self.thread_dispatch_disable_level.load(Ordering::Acquire)
    }

    /// Processor state
    pub fn state(&self) -> PerCpuState {
        PerCpuState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PerCpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the processor was started
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Pending message bits
    pub fn pending_messages(&self) -> SmpMessage {
        SmpMessage::from_bits_truncate(self.message.load(Ordering::Acquire))
    }

    pub(crate) fn post_message(&self, message: SmpMessage) {
        self.message.fetch_or(message.bits(), Ordering::Release);
    }

    pub(crate) fn take_messages(&self) -> SmpMessage {
        SmpMessage::from_bits_truncate(self.message.swap(0, Ordering::AcqRel))
    }

    /// Statistics
    pub fn stats(&self) -> &PerCpuStats {
        &self.stats
    }
}
