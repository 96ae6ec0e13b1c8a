// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Fatal error handling
//!
//! Conditions the kernel cannot recover from are not returned as error
//! codes. They end in [`terminate`], which logs the error, gives the
//! registered [`FatalHandler`] one chance to observe it and then halts
//! the processor by panicking. Kernel profiles build with
//! `panic = "abort"`; hosted tests unwind and catch the exit.

use core::fmt;

/// Internal error codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    /// Thread dispatch enabled more often than it was disabled
    BadThreadDispatchDisableLevel = 18,
    /// A thread tried to block on a queue whose owner it already is
    ThreadQueueDeadlock = 28,
}

/// SMP fatal error codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpFatal {
    /// A processor entered the shutdown state without a shutdown request
    Shutdown = 4,
    /// A processor received the shutdown message
    ShutdownResponse = 5,
    /// A processor that must be present did not start
    StartOfMandatoryProcessorFailed = 6,
    /// Jobs were waited for on a processor that cannot perform them
    WrongCpuStateToPerformJobs = 8,
}

/// A fatal error with its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// Raised by the core itself
    Internal(InternalError),
    /// Raised by the SMP processor management
    Smp(SmpFatal),
}

impl FatalError {
    /// Numeric code within its source
    pub const fn code(&self) -> u32 {
        match self {
            FatalError::Internal(e) => *e as u32,
            FatalError::Smp(e) => *e as u32,
        }
    }

    /// Name of the error source
    pub const fn source_name(&self) -> &'static str {
        match self {
            FatalError::Internal(_) => "INTERNAL_ERROR_CORE",
            FatalError::Smp(_) => "SMP",
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Internal(e) => write!(f, "{}: {:?} ({})", self.source_name(), e, self.code()),
            FatalError::Smp(e) => write!(f, "{}: {:?} ({})", self.source_name(), e, self.code()),
        }
    }
}

/// Hook invoked once per fatal error, before the processor halts
pub type FatalHandler = fn(&FatalError);

/// Terminate after a fatal error
pub fn terminate(handler: Option<FatalHandler>, error: FatalError) -> ! {
    log::error!("fatal error: {}", error);
    if let Some(handler) = handler {
        handler(&error);
    }
    panic!("fatal error: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fatal_codes() {
        assert_eq!(FatalError::Internal(InternalError::ThreadQueueDeadlock).code(), 28);
        assert_eq!(FatalError::Smp(SmpFatal::ShutdownResponse).code(), 5);
        assert_eq!(FatalError::Smp(SmpFatal::Shutdown).source_name(), "SMP");
    }

    #[test]
    fn test_terminate_calls_handler_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn handler(error: &FatalError) {
            assert_eq!(*error, FatalError::Smp(SmpFatal::Shutdown));
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let result = std::panic::catch_unwind(|| {
            terminate(Some(handler), FatalError::Smp(SmpFatal::Shutdown))
        });
        assert!(result.is_err());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
