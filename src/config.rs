// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! System configuration
//!
//! The processor count is fixed when the [`crate::System`] is built. The
//! per-CPU arena is sized from it once and never reallocated.

use core::fmt;

/// Maximum number of processors supported
pub const MAX_PROCESSORS: usize = 32;

/// Configuration problems detected by [`Config::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one processor is required
    NoProcessors,
    /// More processors than [`MAX_PROCESSORS`]
    TooManyProcessors(usize),
    /// The boot processor index is outside the configured range
    InvalidBootProcessor(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoProcessors => write!(f, "no processors configured"),
            ConfigError::TooManyProcessors(n) => {
                write!(f, "{} processors configured, at most {} supported", n, MAX_PROCESSORS)
            }
            ConfigError::InvalidBootProcessor(i) => write!(f, "boot processor {} out of range", i),
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of processors, each gets one per-CPU control record
    pub processor_count: usize,
    /// Index of the processor running sequential initialization
    pub boot_processor: usize,
}

impl Config {
    /// Single processor configuration
    pub const fn uniprocessor() -> Self {
        Self {
            processor_count: 1,
            boot_processor: 0,
        }
    }

    /// SMP configuration with `processor_count` processors, booting on 0
    pub const fn smp(processor_count: usize) -> Self {
        Self {
            processor_count,
            boot_processor: 0,
        }
    }

    /// Select the boot processor
    pub const fn with_boot_processor(mut self, index: usize) -> Self {
        self.boot_processor = index;
        self
    }

    /// Whether more than one processor is configured
    pub const fn is_smp(&self) -> bool {
        self.processor_count > 1
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor_count == 0 {
            return Err(ConfigError::NoProcessors);
        }
        if self.processor_count > MAX_PROCESSORS {
            return Err(ConfigError::TooManyProcessors(self.processor_count));
        }
        if self.boot_processor >= self.processor_count {
            return Err(ConfigError::InvalidBootProcessor(self.boot_processor));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::uniprocessor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validate() {
        assert_eq!(Config::uniprocessor().validate(), Ok(()));
        assert_eq!(Config::smp(4).validate(), Ok(()));
        assert_eq!(Config::smp(0).validate(), Err(ConfigError::NoProcessors));
        assert_eq!(
            Config::smp(MAX_PROCESSORS + 1).validate(),
            Err(ConfigError::TooManyProcessors(MAX_PROCESSORS + 1))
        );
        assert_eq!(
            Config::smp(2).with_boot_processor(2).validate(),
            Err(ConfigError::InvalidBootProcessor(2))
        );
    }

    #[test]
    fn test_config_is_smp() {
        assert!(!Config::default().is_smp());
        assert!(Config::smp(2).is_smp());
    }
}
