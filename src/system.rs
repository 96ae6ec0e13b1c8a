// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! System arena
//!
//! [`System`] owns everything that exists once per system: the per-CPU
//! control records, the scheduler, the processor state lock and the
//! fatal error handler. Threads keep a `&'static System` and reach their
//! home processor by index.
//!
//! A kernel creates exactly one system with [`System::init`]. Hosted code
//! and tests may leak as many independent systems as they need.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch;
use crate::config::{Config, ConfigError};
use crate::fatal::{self, FatalError, FatalHandler};
use crate::sched::dispatch::DispatchGuard;
use crate::sched::percpu::PerCpu;
use crate::sched::scheduler::{PriorityScheduler, Scheduler};
use crate::sched::state::Priority;
use crate::sched::thread::{Thread, ThreadRef};
use crate::sync::spinlock::TicketLock;

static SYSTEM: spin::Once<System> = spin::Once::new();

/// Per-system state
pub struct System {
    config: Config,
    cpus: Box<[PerCpu]>,
    scheduler: Box<dyn Scheduler>,
    /// Serializes processor state changes
    pub(crate) state_lock: TicketLock<()>,
    fatal_handler: spin::RwLock<Option<FatalHandler>>,
}

impl System {
    /// Create a system with the default priority scheduler
    ///
    /// Thread dispatching starts disabled on every processor and is
    /// enabled by [`System::start_multitasking`].
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = Box::new(PriorityScheduler::new(config.processor_count));
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Create a system with a custom scheduler
    ///
    /// # Panics
    /// Panics if `config` does not validate.
    pub fn with_scheduler(config: Config, scheduler: Box<dyn Scheduler>) -> Self {
        if let Err(e) = config.validate() {
            panic!("system: {}", e);
        }
        let cpus: Vec<_> = (0..config.processor_count)
            .map(|index| {
                let cpu = PerCpu::new(index);
                cpu.thread_dispatch_disable_level
                    .store(1, core::sync::atomic::Ordering::Relaxed);
                cpu
            })
            .collect();
        cpus[config.boot_processor].set_online(true);

        log::info!(
            "system: {} processor(s), boot cpu{}, scheduler {}",
            config.processor_count,
            config.boot_processor,
            scheduler.name()
        );

        Self {
            config,
            cpus: cpus.into_boxed_slice(),
            scheduler,
            state_lock: TicketLock::new(()),
            fatal_handler: spin::RwLock::new(None),
        }
    }

    /// Create the global system
    ///
    /// # Returns
    /// * The global system, the configuration of a later call is ignored
    pub fn init(config: Config) -> Result<&'static System, ConfigError> {
        SYSTEM.try_call_once(|| System::new(config))
    }

    /// The global system, if [`System::init`] ran
    pub fn get() -> Option<&'static System> {
        SYSTEM.get()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of configured processors
    pub fn processor_count(&self) -> usize {
        self.cpus.len()
    }

    /// Per-CPU control of processor `index`
    ///
    /// # Panics
    /// Panics if `index` is not a configured processor.
    pub fn cpu(&self, index: usize) -> &PerCpu {
        &self.cpus[index]
    }

    /// Per-CPU control of processor `index`, if configured
    pub fn get_cpu(&self, index: usize) -> Option<&PerCpu> {
        self.cpus.get(index)
    }

    /// All per-CPU control records in index order
    pub fn cpus(&self) -> impl Iterator<Item = &PerCpu> {
        self.cpus.iter()
    }

    /// Per-CPU control of the calling processor
    pub fn current_cpu(&self) -> &PerCpu {
        let index = arch::port().current_processor();
        self.get_cpu(index).unwrap_or_else(|| self.boot_cpu())
    }

    /// Per-CPU control of the boot processor
    pub fn boot_cpu(&self) -> &PerCpu {
        &self.cpus[self.config.boot_processor]
    }

    /// The scheduler
    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.scheduler
    }

    /// Create a dormant thread homed on processor `cpu`
    pub fn create_thread(
        &'static self,
        name: &'static str,
        priority: Priority,
        cpu: usize,
    ) -> ThreadRef {
        let cpu = if cpu < self.processor_count() {
            cpu
        } else {
            log::warn!(
                "system: thread {} on unknown cpu{}, using cpu{}",
                name,
                cpu,
                self.config.boot_processor
            );
            self.config.boot_processor
        };
        let thread = Arc::new(Thread::new(self, name, priority, cpu));
        log::debug!(
            "system: created thread {} ({}) priority {} on cpu{}",
            thread.id(),
            name,
            priority.0,
            cpu
        );
        thread
    }

    /// Install the handler called on fatal errors
    pub fn set_fatal_handler(&self, handler: FatalHandler) {
        *self.fatal_handler.write() = Some(handler);
    }

    /// Terminate with a fatal error
    pub fn fatal(&self, error: FatalError) -> ! {
        let handler = *self.fatal_handler.read();
        fatal::terminate(handler, error)
    }

    /// Disable thread dispatching on the calling processor
    pub fn dispatch_disable(&self) -> DispatchGuard<'_> {
        DispatchGuard::new(self, self.current_cpu())
    }
}
