// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Hosted processor port
//!
//! Runs the core on top of std threads, one host thread per kernel thread.
//! Interrupt disabling is emulated with a per-host-thread flag, and a host
//! thread can be bound to a processor index with [`bind_processor`].
//! Suspension parks the host thread on a condition variable. A resume
//! that arrives first leaves a token behind, so it is never lost.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::MAX_PROCESSORS;
use crate::sched::thread::{Thread, ThreadId};
use crate::time::Timespec;
use crate::traits::{CpuPort, IsrLevel, SuspendOutcome};

/// The port installed by default in hosted builds
pub static HOST_PORT: HostPort = HostPort::new();

thread_local! {
    static ISR_DISABLED: Cell<bool> = const { Cell::new(false) };
    static PROCESSOR: Cell<usize> = const { Cell::new(0) };
}

/// Bind the calling host thread to a processor index
pub fn bind_processor(index: usize) {
    PROCESSOR.with(|p| p.set(index));
}

#[derive(Default)]
struct Parker {
    token: Mutex<bool>,
    wakeup: Condvar,
}

/// Hosted port state
pub struct HostPort {
    parkers: Mutex<BTreeMap<ThreadId, Arc<Parker>>>,
    ipis: [AtomicU64; MAX_PROCESSORS],
}

impl HostPort {
    /// Create a hosted port
    pub const fn new() -> Self {
        Self {
            parkers: Mutex::new(BTreeMap::new()),
            ipis: [const { AtomicU64::new(0) }; MAX_PROCESSORS],
        }
    }

    /// Number of inter-processor interrupts raised on a processor
    pub fn ipi_count(&self, index: usize) -> u64 {
        self.ipis
            .get(index)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    fn parker(&self, id: ThreadId) -> Arc<Parker> {
        let mut parkers = self.parkers.lock().unwrap_or_else(PoisonError::into_inner);
        parkers.entry(id).or_default().clone()
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuPort for HostPort {
    fn disable_interrupts(&self) -> IsrLevel {
        let was_disabled = ISR_DISABLED.with(|d| d.replace(true));
        IsrLevel(usize::from(!was_disabled))
    }

    fn restore_interrupts(&self, level: IsrLevel) {
        ISR_DISABLED.with(|d| d.set(level.0 == 0));
    }

    fn interrupts_enabled(&self) -> bool {
        !ISR_DISABLED.with(|d| d.get())
    }

    fn current_processor(&self) -> usize {
        PROCESSOR.with(|p| p.get())
    }

    fn send_ipi(&self, index: usize) {
        if let Some(count) = self.ipis.get(index) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn now(&self) -> Timespec {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timespec::new(since_epoch.as_secs() as i64, since_epoch.subsec_nanos() as i64)
    }

    fn suspend(&self, thread: &Thread, deadline: Option<Timespec>) -> SuspendOutcome {
        let parker = self.parker(thread.id());
        let mut token = parker.token.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *token {
                *token = false;
                return SuspendOutcome::Resumed;
            }
            match deadline {
                None => {
                    token = parker
                        .wakeup
                        .wait(token)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let remaining = self.now().nanos_until(&deadline);
                    if remaining == 0 {
                        return SuspendOutcome::DeadlineExpired;
                    }
                    token = match parker.wakeup.wait_timeout(token, Duration::from_nanos(remaining)) {
                        Ok((token, _)) => token,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }
    }

    fn resume(&self, thread: &Thread) {
        let parker = self.parker(thread.id());
        let mut token = parker.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = true;
        parker.wakeup.notify_one();
    }

    fn thread_deleted(&self, id: ThreadId) {
        let mut parkers = self.parkers.lock().unwrap_or_else(PoisonError::into_inner);
        parkers.remove(&id);
    }

    fn processor_event_wait(&self) {
        std::thread::yield_now();
    }
}
