// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread dispatcher
//!
//! Scheduler decisions only record a new heir and raise the
//! dispatch-necessary flag of the affected processor. The context switch
//! itself happens later, at the first safe point:
//!
//! - the thread dispatch disable level of the processor drops to zero, or
//! - the outermost interrupt handler returns to thread context.
//!
//! The disable level keeps kernel bookkeeping atomic with respect to
//! dispatching on one processor. Thread queue locks keep it atomic across
//! processors.

use core::sync::atomic::Ordering;

use super::percpu::{PerCpu, PerCpuState};
use super::thread::ThreadRef;
use crate::arch;
use crate::fatal::{FatalError, InternalError};
use crate::system::System;

/// Scoped thread dispatch disable
///
/// Construction increments the disable level of a processor. Drop
/// decrements it and performs a pending context switch when it reaches
/// zero.
pub struct DispatchGuard<'a> {
    system: &'a System,
    cpu: &'a PerCpu,
}

impl<'a> DispatchGuard<'a> {
    /// Disable thread dispatching on `cpu`
    pub fn new(system: &'a System, cpu: &'a PerCpu) -> Self {
        cpu.thread_dispatch_disable_level
            .fetch_add(1, Ordering::AcqRel);
        Self { system, cpu }
    }

    /// The processor dispatching is disabled on
    pub fn cpu(&self) -> &'a PerCpu {
        self.cpu
    }
}

impl<'a> Drop for DispatchGuard<'a> {
    fn drop(&mut self) {
        self.cpu.dispatch_enable(self.system);
    }
}

fn same_thread(a: &Option<ThreadRef>, b: &Option<ThreadRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => alloc::sync::Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl PerCpu {
    /// Enable thread dispatching, dispatch if the level reached zero
    pub(crate) fn dispatch_enable(&self, system: &System) {
        let previous = self
            .thread_dispatch_disable_level
            .fetch_sub(1, Ordering::AcqRel);
        match previous {
            0 => {
                self.thread_dispatch_disable_level.store(0, Ordering::Release);
                system.fatal(FatalError::Internal(InternalError::BadThreadDispatchDisableLevel));
            }
            1 => {
                self.thread_dispatch();
            }
            _ => {}
        }
    }

    /// Select a new heir
    ///
    /// Raises the dispatch-necessary flag and interrupts the processor if
    /// it is another one that is already up.
    pub fn update_heir(&self, heir: Option<ThreadRef>) {
        {
            let mut slots = self.slots.lock();
            if same_thread(&slots.heir, &heir) {
                return;
            }
            log::trace!(
                "cpu{}: heir {:?}",
                self.index(),
                heir.as_ref().map(|t| t.name())
            );
            slots.heir = heir;
        }
        self.dispatch_necessary.store(true, Ordering::Release);

        let port = arch::port();
        if self.index() != port.current_processor() && self.state() == PerCpuState::Up {
            port.send_ipi(self.index());
        }
    }

    /// Perform a pending context switch if this processor may switch now
    ///
    /// # Returns
    /// * `true` if the executing thread changed
    pub fn thread_dispatch(&self) -> bool {
        if !self.is_dispatch_necessary() {
            return false;
        }
        let port = arch::port();
        if self.dispatch_disable_level() != 0
            || self.isr_nest_level() != 0
            || port.current_processor() != self.index()
        {
            self.stats().deferred_dispatches.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut switched = false;
        while self.dispatch_necessary.swap(false, Ordering::AcqRel) {
            let (from, to) = {
                let mut slots = self.slots.lock();
                let heir = slots.heir.clone();
                let from = core::mem::replace(&mut slots.executing, heir.clone());
                (from, heir)
            };
            if same_thread(&from, &to) {
                continue;
            }
            self.stats().context_switches.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "cpu{}: switch {:?} -> {:?}",
                self.index(),
                from.as_ref().map(|t| t.name()),
                to.as_ref().map(|t| t.name())
            );
            port.context_switch(self.index(), from.as_deref(), to.as_deref());
            switched = true;
        }
        switched
    }

    /// Enter an interrupt handler
    pub fn isr_enter(&self) {
        self.isr_nest_level.fetch_add(1, Ordering::AcqRel);
        self.stats().interrupts.fetch_add(1, Ordering::Relaxed);
    }

    /// Leave an interrupt handler
    ///
    /// Returning from the outermost handler to thread context performs a
    /// pending context switch.
    ///
    /// # Returns
    /// * `true` if the executing thread changed
    pub fn isr_exit(&self) -> bool {
        let previous = self.isr_nest_level.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "isr_exit without isr_enter");
        if previous == 1 && self.dispatch_disable_level() == 0 {
            return self.thread_dispatch();
        }
        false
    }

    /// First context switch of this processor into its heir
    pub(crate) fn start_multitasking(&self) {
        let heir = {
            let mut slots = self.slots.lock();
            slots.executing = slots.heir.clone();
            slots.heir.clone()
        };
        self.dispatch_necessary.store(false, Ordering::Release);
        self.thread_dispatch_disable_level.store(0, Ordering::Release);
        self.stats().context_switches.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "cpu{}: start multitasking with {:?}",
            self.index(),
            heir.as_ref().map(|t| t.name())
        );
        arch::port().context_switch(self.index(), None, heir.as_deref());
    }
}
