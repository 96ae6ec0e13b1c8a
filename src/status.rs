// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Status and error codes
//!
//! Every wait on a thread queue ends with a [`Status`] stored in the
//! waiting thread. Public operations translate it into an [`Errno`],
//! using the newlib numbering that kernel consumers expect.

use core::fmt;

/// Error numbers returned by the blocking objects
#[allow(clippy::upper_case_acronyms)]
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Resource temporarily unavailable
    EAGAIN = 11,
    /// Resource busy
    EBUSY = 16,
    /// Invalid argument
    EINVAL = 22,
    /// Resource deadlock would occur
    EDEADLK = 45,
    /// Timed out
    ETIMEDOUT = 116,
}

impl Errno {
    /// Operation would block (same number as `EAGAIN`)
    pub const EWOULDBLOCK: Errno = Errno::EAGAIN;

    /// Get the raw error number
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Errno::EAGAIN => "resource temporarily unavailable",
            Errno::EBUSY => "resource busy",
            Errno::EINVAL => "invalid argument",
            Errno::EDEADLK => "resource deadlock avoided",
            Errno::ETIMEDOUT => "timed out",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Outcome of a thread queue wait
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The wait was satisfied
    Successful = 0,
    /// The object is not available (deleted or flushed)
    Unavailable = 1,
    /// The object was deleted while the thread waited
    ObjectWasDeleted = 2,
    /// The deadline elapsed first
    Timeout = 3,
    /// The timeout representation was malformed
    InvalidNumber = 4,
    /// Blocking would close an ownership cycle
    Deadlock = 5,
}

impl Status {
    /// Decode a status stored in a thread's wait slot
    pub(crate) const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Status::Successful,
            1 => Status::Unavailable,
            2 => Status::ObjectWasDeleted,
            3 => Status::Timeout,
            4 => Status::InvalidNumber,
            _ => Status::Deadlock,
        }
    }

    /// Whether the wait was satisfied
    pub const fn is_successful(self) -> bool {
        matches!(self, Status::Successful)
    }

    /// Map to the error number reported to callers
    pub const fn to_errno(self) -> Option<Errno> {
        match self {
            Status::Successful => None,
            Status::Unavailable | Status::ObjectWasDeleted | Status::InvalidNumber => {
                Some(Errno::EINVAL)
            }
            Status::Timeout => Some(Errno::ETIMEDOUT),
            Status::Deadlock => Some(Errno::EDEADLK),
        }
    }

    /// Convert into the `Result` form used by the public operations
    pub fn into_result(self) -> Result<(), Errno> {
        match self.to_errno() {
            None => Ok(()),
            Some(errno) => Err(errno),
        }
    }
}
