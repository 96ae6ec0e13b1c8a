// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler seam
//!
//! The synchronization core never picks threads itself. It reports
//! readiness and priority changes through [`Scheduler`], and the
//! scheduler answers by updating the heir of the affected processor.
//!
//! [`PriorityScheduler`] is the default policy: one ready queue per
//! processor, highest effective priority first, FIFO among equals.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::percpu::PerCpu;
use super::state::RunQueue;
use super::thread::ThreadRef;
use crate::sync::spinlock::TicketLock;

/// Scheduler policy operations
///
/// Each operation is called with thread dispatching disabled on the
/// thread's home processor and with the thread's state lock held.
pub trait Scheduler: Send + Sync {
    /// Policy name
    fn name(&self) -> &'static str;

    /// The thread became ready
    fn unblock(&self, cpu: &PerCpu, thread: &ThreadRef);

    /// The thread is no longer ready
    fn block(&self, cpu: &PerCpu, thread: &ThreadRef);

    /// The effective priority of a ready thread changed
    fn update_priority(&self, cpu: &PerCpu, thread: &ThreadRef);

    /// Number of ready threads on a processor
    fn ready_count(&self, cpu: &PerCpu) -> usize;
}

/// Fixed-priority scheduler with per-processor ready queues
pub struct PriorityScheduler {
    ready: Box<[TicketLock<RunQueue>]>,
}

impl PriorityScheduler {
    /// Create ready queues for `processor_count` processors
    pub fn new(processor_count: usize) -> Self {
        let ready: Vec<_> = (0..processor_count)
            .map(|_| TicketLock::new(RunQueue::new()))
            .collect();
        Self {
            ready: ready.into_boxed_slice(),
        }
    }

    fn queue(&self, cpu: &PerCpu) -> &TicketLock<RunQueue> {
        &self.ready[cpu.index()]
    }
}

impl Scheduler for PriorityScheduler {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn unblock(&self, cpu: &PerCpu, thread: &ThreadRef) {
        let mut rq = self.queue(cpu).lock();
        rq.enqueue(thread.clone());
        cpu.update_heir(rq.highest().cloned());
    }

    fn block(&self, cpu: &PerCpu, thread: &ThreadRef) {
        let mut rq = self.queue(cpu).lock();
        if rq.remove(thread) {
            cpu.update_heir(rq.highest().cloned());
        }
    }

    fn update_priority(&self, cpu: &PerCpu, thread: &ThreadRef) {
        let mut rq = self.queue(cpu).lock();
        if rq.requeue(thread) {
            cpu.update_heir(rq.highest().cloned());
        }
    }

    fn ready_count(&self, cpu: &PerCpu) -> usize {
        self.queue(cpu).lock().len()
    }
}
