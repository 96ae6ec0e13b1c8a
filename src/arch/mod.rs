// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Processor ports
//!
//! The port is a process-wide singleton installed during early boot with
//! [`install`]. Hosted builds (`std` feature and unit tests) fall back to
//! the [`host`] port when nothing was installed.
//!
//! # Usage
//!
//! ```ignore
//! static PORT: Amd64Port = Amd64Port::new(2_000_000_000);
//! supercore::arch::install(&PORT);
//!
//! {
//!     let _isr = IsrGuard::new();
//!     // interrupts disabled on this processor
//! }
//! // previous level restored
//! ```

#[cfg(all(target_arch = "x86_64", feature = "amd64"))]
pub mod amd64;
#[cfg(any(test, feature = "std"))]
pub mod host;

use core::marker::PhantomData;

use crate::traits::{CpuPort, IsrLevel};

static PORT: spin::Once<&'static dyn CpuPort> = spin::Once::new();

/// Install the processor port
///
/// # Returns
/// * `true` if this call installed the port
/// * `false` if a port was already installed, the argument is ignored
pub fn install(port: &'static dyn CpuPort) -> bool {
    let mut installed = false;
    PORT.call_once(|| {
        installed = true;
        port
    });
    installed
}

/// Get the installed processor port
#[cfg(any(test, feature = "std"))]
pub fn port() -> &'static dyn CpuPort {
    *PORT.call_once(|| &host::HOST_PORT)
}

/// Get the installed processor port
///
/// # Panics
/// Panics if called before [`install`].
#[cfg(not(any(test, feature = "std")))]
pub fn port() -> &'static dyn CpuPort {
    match PORT.get() {
        Some(port) => *port,
        None => panic!("arch: no processor port installed"),
    }
}

/// Scoped interrupt disable
///
/// Construction disables interrupts on the current processor, drop
/// restores the level that was in effect before. The guard is bound to
/// the processor that created it and cannot be sent to another thread.
pub struct IsrGuard {
    level: IsrLevel,
    _not_send: PhantomData<*const ()>,
}

impl IsrGuard {
    /// Disable interrupts until the guard is dropped
    pub fn new() -> Self {
        Self {
            level: port().disable_interrupts(),
            _not_send: PhantomData,
        }
    }
}

impl Default for IsrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        port().restore_interrupts(self.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isr_guard_restores() {
        assert!(port().interrupts_enabled());
        {
            let _outer = IsrGuard::new();
            assert!(!port().interrupts_enabled());
            {
                let _inner = IsrGuard::new();
                assert!(!port().interrupts_enabled());
            }
            assert!(!port().interrupts_enabled());
        }
        assert!(port().interrupts_enabled());
    }

    #[test]
    fn test_isr_guard_restores_on_early_return() {
        fn bail(flag: bool) -> Result<(), ()> {
            let _isr = IsrGuard::new();
            if flag {
                return Err(());
            }
            Ok(())
        }

        assert!(bail(true).is_err());
        assert!(port().interrupts_enabled());
        assert!(bail(false).is_ok());
        assert!(port().interrupts_enabled());
    }

    #[test]
    fn test_install_after_default_is_ignored() {
        let _ = port();
        assert!(!install(&host::HOST_PORT));
    }
}
