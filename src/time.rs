// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Absolute timeouts
//!
//! Timed waits take an absolute [`Timespec`] against the port clock
//! ([`crate::traits::CpuPort::now`]). A timeout is checked before the
//! calling thread is enqueued:
//!
//! - `tv_nsec` outside `[0, 1e9)` is malformed ([`Status::InvalidNumber`])
//! - a deadline at or before now, or with negative seconds, has elapsed
//!   ([`Status::Timeout`])

use core::cmp::Ordering;

use crate::status::Status;

/// Nanoseconds per second
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// An absolute point in time, in the layout of `struct timespec`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    /// Seconds
    pub tv_sec: i64,
    /// Nanoseconds, valid in `[0, 1e9)`
    pub tv_nsec: i64,
}

impl Timespec {
    /// Create a timespec
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Create a timespec from nanoseconds since the epoch
    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            tv_sec: (nanos / NSEC_PER_SEC as u64) as i64,
            tv_nsec: (nanos % NSEC_PER_SEC as u64) as i64,
        }
    }

    /// Whether the nanoseconds field is in range
    pub const fn is_valid(&self) -> bool {
        self.tv_nsec >= 0 && self.tv_nsec < NSEC_PER_SEC
    }

    /// Nanoseconds since the epoch, `None` for negative or malformed values
    pub fn as_nanos(&self) -> Option<u64> {
        if !self.is_valid() || self.tv_sec < 0 {
            return None;
        }
        (self.tv_sec as u64)
            .checked_mul(NSEC_PER_SEC as u64)?
            .checked_add(self.tv_nsec as u64)
    }

    /// Add a relative number of nanoseconds, saturating at the far future
    pub fn add_nanos(&self, nanos: u64) -> Self {
        let total = self.tv_nsec as u64 + nanos % NSEC_PER_SEC as u64;
        let carry = (total / NSEC_PER_SEC as u64) as i64;
        let secs = (nanos / NSEC_PER_SEC as u64) as i64;
        Self {
            tv_sec: self.tv_sec.saturating_add(secs).saturating_add(carry),
            tv_nsec: (total % NSEC_PER_SEC as u64) as i64,
        }
    }

    /// Nanoseconds from `self` until `later`, zero if already reached
    pub fn nanos_until(&self, later: &Timespec) -> u64 {
        match (self.as_nanos(), later.as_nanos()) {
            (Some(now), Some(then)) => then.saturating_sub(now),
            (_, None) => 0,
            (None, Some(then)) => then,
        }
    }
}

impl PartialOrd for Timespec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timespec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tv_sec
            .cmp(&other.tv_sec)
            .then(self.tv_nsec.cmp(&other.tv_nsec))
    }
}

/// Validate an optional absolute deadline against the current time
///
/// Returns the deadline to block with (`None` waits forever).
pub fn check_deadline(
    abstime: Option<&Timespec>,
    now: Timespec,
) -> Result<Option<Timespec>, Status> {
    let Some(deadline) = abstime else {
        return Ok(None);
    };
    if !deadline.is_valid() {
        return Err(Status::InvalidNumber);
    }
    if deadline.tv_sec < 0 || *deadline <= now {
        return Err(Status::Timeout);
    }
    Ok(Some(*deadline))
}
