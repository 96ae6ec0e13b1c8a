// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! SMP processor management
//!
//! # Startup
//!
//! ```text
//! boot processor                          secondary processor
//! --------------                          -------------------
//! start_processors()
//! ...sequential initialization...         state -> READY_TO_START_MULTITASKING
//! request_start_multitasking()
//!   self  -> READY_TO_START_MULTITASKING
//!   each  -> REQUEST_START_MULTITASKING   (waits until each one is READY)
//! start_multitasking(boot)                start_multitasking(self)
//!   self -> UP, switch to heir              waits for REQUEST, -> UP, switch to heir
//! ```
//!
//! A secondary that never reaches `READY_TO_START_MULTITASKING` stalls
//! the boot processor. There is no timeout.
//!
//! # Shutdown
//!
//! Entering `SHUTDOWN` sends the shutdown message to every other
//! processor that is `UP` and forces all other processors into
//! `SHUTDOWN`. Every transition not in the table below becomes a
//! shutdown, and an unrequested shutdown is fatal.
//!
//! | from | allowed |
//! |---|---|
//! | `INITIAL` | `READY_TO_START_MULTITASKING`, `SHUTDOWN` |
//! | `READY_TO_START_MULTITASKING` | `REQUEST_START_MULTITASKING`, `SHUTDOWN` |
//! | `REQUEST_START_MULTITASKING` | `UP`, `SHUTDOWN` |
//! | `UP` | `SHUTDOWN` |

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use super::percpu::{PerCpuState, SmpMessage};
use crate::arch;
use crate::fatal::{FatalError, SmpFatal};
use crate::system::System;

/// Handler run by a per-CPU job, called with the processor index
pub type JobHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Work queued for a specific processor
pub struct Job {
    handler: JobHandler,
    done: AtomicBool,
}

impl Job {
    /// Create a job
    pub fn new(handler: JobHandler) -> Arc<Self> {
        Arc::new(Self {
            handler,
            done: AtomicBool::new(false),
        })
    }

    /// Whether the target processor ran the job
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

fn next_state(current: PerCpuState, requested: PerCpuState) -> PerCpuState {
    use PerCpuState::*;
    match (current, requested) {
        (Initial, ReadyToStartMultitasking)
        | (ReadyToStartMultitasking, RequestStartMultitasking)
        | (RequestStartMultitasking, Up) => requested,
        _ => Shutdown,
    }
}

impl System {
    // ========================================================================
    // Processor state
    // ========================================================================

    fn busy_wait_before(&self, index: usize, requested: PerCpuState) {
        let cpu = self.cpu(index);
        let port = arch::port();
        let wanted = match requested {
            PerCpuState::RequestStartMultitasking => PerCpuState::ReadyToStartMultitasking,
            PerCpuState::Up => PerCpuState::RequestStartMultitasking,
            _ => return,
        };
        loop {
            let state = cpu.state();
            if state == wanted || state == PerCpuState::Shutdown {
                return;
            }
            port.processor_event_wait();
        }
    }

    /// Change the state of processor `index`
    ///
    /// Waits for the processor to reach the predecessor of `requested`
    /// first. See the module documentation for the transition table.
    pub fn state_change(&self, index: usize, requested: PerCpuState) {
        self.busy_wait_before(index, requested);

        let next = {
            let _lock = self.state_lock.lock();
            let cpu = self.cpu(index);
            let next = next_state(cpu.state(), requested);
            cpu.set_state(next);
            log::info!("cpu{}: {:?} (requested {:?})", index, next, requested);

            if next == PerCpuState::Shutdown {
                for other in self.cpus().filter(|c| c.index() != index) {
                    if other.state() == PerCpuState::Up {
                        self.send_message(other.index(), SmpMessage::SHUTDOWN);
                    }
                    other.set_state(PerCpuState::Shutdown);
                }
            }
            next
        };

        if next == PerCpuState::Shutdown && requested != PerCpuState::Shutdown {
            self.fatal(FatalError::Smp(SmpFatal::Shutdown));
        }
    }

    /// Wait until processor `index` left the initial state
    ///
    /// `timeout_ns == 0` waits forever.
    ///
    /// # Returns
    /// * `true` if the processor is no longer `INITIAL`
    pub fn wait_for_non_initial_state(&self, index: usize, timeout_ns: u64) -> bool {
        let cpu = self.cpu(index);
        let port = arch::port();
        let deadline = (timeout_ns > 0).then(|| port.now().add_nanos(timeout_ns));
        while cpu.state() == PerCpuState::Initial {
            if deadline.is_some_and(|d| port.now() >= d) {
                break;
            }
            port.processor_event_wait();
        }
        cpu.state() != PerCpuState::Initial
    }

    /// Mark the secondary processors online
    ///
    /// `start` brings up one processor (for example INIT/SIPI) and reports
    /// whether it started. Every configured processor is mandatory.
    pub fn start_processors(&self, start: impl Fn(usize) -> bool) {
        let boot = self.config().boot_processor;
        for cpu in self.cpus().filter(|c| c.index() != boot) {
            if start(cpu.index()) {
                cpu.set_online(true);
                log::info!("cpu{}: online", cpu.index());
            } else {
                log::error!("cpu{}: failed to start", cpu.index());
                self.fatal(FatalError::Smp(SmpFatal::StartOfMandatoryProcessorFailed));
            }
        }
    }

    /// Boot processor: request all online processors to start multitasking
    pub fn request_start_multitasking(&self) {
        let boot = self.config().boot_processor;
        self.state_change(boot, PerCpuState::ReadyToStartMultitasking);
        for cpu in self.cpus().filter(|c| c.is_online()) {
            self.state_change(cpu.index(), PerCpuState::RequestStartMultitasking);
        }
    }

    /// Secondary processor: report readiness and start multitasking
    pub fn start_multitasking_on_secondary(&self, index: usize) {
        self.state_change(index, PerCpuState::ReadyToStartMultitasking);
        self.start_multitasking(index);
    }

    /// Enter `UP` and perform the first context switch of processor `index`
    pub fn start_multitasking(&self, index: usize) {
        self.state_change(index, PerCpuState::Up);
        self.cpu(index).start_multitasking();
    }

    /// Shut the system down from processor `index`
    pub fn shutdown(&self, index: usize) {
        self.state_change(index, PerCpuState::Shutdown);
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Post a message to processor `index` and interrupt it
    pub fn send_message(&self, index: usize, message: SmpMessage) {
        self.cpu(index).post_message(message);
        arch::port().send_ipi(index);
    }

    /// Post a message to every processor except the caller's
    pub fn broadcast_message(&self, message: SmpMessage) {
        let current = arch::port().current_processor();
        for cpu in self.cpus().filter(|c| c.index() != current) {
            self.send_message(cpu.index(), message);
        }
    }

    /// Inter-processor interrupt handler of processor `index`
    ///
    /// Called by the port from the interrupt vector, between
    /// [`PerCpu::isr_enter`](super::percpu::PerCpu::isr_enter) and
    /// [`PerCpu::isr_exit`](super::percpu::PerCpu::isr_exit).
    pub fn inter_processor_interrupt(&self, index: usize) {
        let cpu = self.cpu(index);
        let message = cpu.take_messages();
        if message.is_empty() {
            return;
        }
        cpu.stats().messages.fetch_add(1, Ordering::Relaxed);

        if message.contains(SmpMessage::SHUTDOWN) {
            self.state_change(index, PerCpuState::Shutdown);
            self.fatal(FatalError::Smp(SmpFatal::ShutdownResponse));
        }
        if message.contains(SmpMessage::TEST) {
            log::debug!("cpu{}: test message", index);
        }
        if message.contains(SmpMessage::PERFORM_JOBS) {
            self.perform_jobs(index);
        }
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Queue a job for processor `index` and ask it to perform its jobs
    pub fn add_job(&self, index: usize, job: Arc<Job>) {
        self.cpu(index).jobs.lock().push_back(job);
        self.send_message(index, SmpMessage::PERFORM_JOBS);
    }

    /// Run the jobs queued for processor `index`
    ///
    /// # Returns
    /// * The number of jobs performed
    pub fn perform_jobs(&self, index: usize) -> usize {
        let mut count = 0;
        loop {
            let job = self.cpu(index).jobs.lock().pop_front();
            let Some(job) = job else {
                break;
            };
            (job.handler)(index);
            job.done.store(true, Ordering::Release);
            count += 1;
        }
        count
    }

    /// Wait until processor `index` performed `job`
    ///
    /// The caller keeps performing its own jobs meanwhile, so two
    /// processors waiting for each other make progress.
    pub fn wait_for_job(&self, index: usize, job: &Job) {
        let port = arch::port();
        while !job.is_done() {
            if self.cpu(index).state() == PerCpuState::Shutdown {
                self.fatal(FatalError::Smp(SmpFatal::WrongCpuStateToPerformJobs));
            }
            let current = port.current_processor();
            if current < self.processor_count() {
                let own = self.cpu(current);
                if own.pending_messages().contains(SmpMessage::PERFORM_JOBS) {
                    self.inter_processor_interrupt(current);
                }
            }
            port.processor_event_wait();
        }
    }

    /// Run `handler` on every processor in `targets` and wait for all
    pub fn multicast_action(&self, targets: &[usize], handler: JobHandler) {
        let jobs: Vec<_> = targets
            .iter()
            .map(|&index| {
                let job = Job::new(handler.clone());
                self.add_job(index, job.clone());
                (index, job)
            })
            .collect();
        for (index, job) in &jobs {
            self.wait_for_job(*index, job);
        }
    }
}
