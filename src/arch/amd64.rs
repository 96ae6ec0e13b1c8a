// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! x86-64 processor port
//!
//! - interrupt level: `RFLAGS.IF`
//! - processor index: `IA32_TSC_AUX`, written by [`Amd64Port::init_processor`]
//! - inter-processor interrupts: x2APIC ICR, fixed delivery, physical mode
//! - clock: TSC scaled by the configured frequency
//!
//! A suspended thread halts its processor with interrupts enabled until
//! the inter-processor interrupt of its waker or a timer interrupt arrives.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use x86_64::instructions::interrupts;
use x86_64::registers::model_specific::Msr;

use crate::config::MAX_PROCESSORS;
use crate::sched::state::WaitFlags;
use crate::sched::thread::Thread;
use crate::time::Timespec;
use crate::traits::{CpuPort, IsrLevel, SuspendOutcome};

/// Auxiliary TSC MSR, holds the processor index
const IA32_TSC_AUX: u32 = 0xC000_0103;

/// x2APIC interrupt command register
const X2APIC_ICR: u32 = 0x830;

/// Default vector used for inter-processor interrupts
pub const DEFAULT_IPI_VECTOR: u8 = 0xF0;

/// x86-64 port state
pub struct Amd64Port {
    tsc_frequency: AtomicU64,
    ipi_vector: u8,
    apic_ids: [AtomicU32; MAX_PROCESSORS],
}

impl Amd64Port {
    /// Create a port with the given TSC frequency in Hz
    pub const fn new(tsc_frequency: u64) -> Self {
        Self {
            tsc_frequency: AtomicU64::new(tsc_frequency),
            ipi_vector: DEFAULT_IPI_VECTOR,
            apic_ids: [const { AtomicU32::new(0) }; MAX_PROCESSORS],
        }
    }

    /// Use a different vector for inter-processor interrupts
    pub const fn with_ipi_vector(mut self, vector: u8) -> Self {
        self.ipi_vector = vector;
        self
    }

    /// Record the processor index of the calling processor and its x2APIC id
    ///
    /// # Safety
    ///
    /// Must run once on each processor before it uses the core, with
    /// interrupts disabled. Writes `IA32_TSC_AUX`.
    pub unsafe fn init_processor(&self, index: usize, apic_id: u32) {
        if let Some(slot) = self.apic_ids.get(index) {
            slot.store(apic_id, Ordering::Relaxed);
        }
        let mut aux = Msr::new(IA32_TSC_AUX);
        aux.write(index as u64);
    }

    /// Update the TSC frequency after calibration
    pub fn set_tsc_frequency(&self, hz: u64) {
        self.tsc_frequency.store(hz, Ordering::Relaxed);
    }

    fn tsc_to_ns(&self, ticks: u64) -> u64 {
        let freq = self.tsc_frequency.load(Ordering::Relaxed);
        if freq == 0 {
            return 0;
        }
        ((ticks as u128 * 1_000_000_000) / freq as u128) as u64
    }
}

impl CpuPort for Amd64Port {
    fn disable_interrupts(&self) -> IsrLevel {
        let enabled = interrupts::are_enabled();
        interrupts::disable();
        IsrLevel(usize::from(enabled))
    }

    fn restore_interrupts(&self, level: IsrLevel) {
        if level.0 != 0 {
            interrupts::enable();
        }
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn current_processor(&self) -> usize {
        let aux = Msr::new(IA32_TSC_AUX);
        unsafe { aux.read() as usize }
    }

    fn send_ipi(&self, index: usize) {
        let Some(apic_id) = self.apic_ids.get(index) else {
            return;
        };
        let icr = (u64::from(apic_id.load(Ordering::Relaxed)) << 32) | u64::from(self.ipi_vector);
        let mut reg = Msr::new(X2APIC_ICR);
        unsafe { reg.write(icr) };
    }

    fn now(&self) -> Timespec {
        let ticks = unsafe { core::arch::x86_64::_rdtsc() };
        Timespec::from_nanos(self.tsc_to_ns(ticks))
    }

    fn suspend(&self, thread: &Thread, deadline: Option<Timespec>) -> SuspendOutcome {
        let level = self.disable_interrupts();
        let outcome = loop {
            if thread.wait_flags().contains(WaitFlags::READY_AGAIN) {
                break SuspendOutcome::Resumed;
            }
            if let Some(deadline) = deadline {
                if self.now() >= deadline {
                    break SuspendOutcome::DeadlineExpired;
                }
            }
            // sti; hlt is atomic, a wakeup between check and halt is not lost
            interrupts::enable_and_hlt();
            interrupts::disable();
        };
        self.restore_interrupts(level);
        outcome
    }

    fn resume(&self, thread: &Thread) {
        if thread.cpu() != self.current_processor() {
            self.send_ipi(thread.cpu());
        }
    }

    fn processor_event_wait(&self) {
        core::hint::spin_loop();
    }
}
