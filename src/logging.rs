// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel logger
//!
//! The core logs through the `log` facade. This module provides the
//! logger a kernel installs to see those records: each record is
//! formatted with its level and the index of the processor that emitted
//! it, then handed to a console sink supplied by the board support code.

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::arch;

/// Console output function
pub type LogSink = fn(fmt::Arguments<'_>);

static SINK: spin::Once<LogSink> = spin::Once::new();
static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.get() {
            sink(format_args!(
                "\x1b[{}m[{:>5}][cpu{}] {}\x1b[0m\n",
                level_to_color_code(record.level()),
                record.level(),
                arch::port().current_processor(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}

/// Level selected at build time through the `LOG` environment variable
pub fn level_from_env() -> LevelFilter {
    parse_level(option_env!("LOG"))
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    match value {
        Some("error") | Some("ERROR") => LevelFilter::Error,
        Some("warn") | Some("WARN") => LevelFilter::Warn,
        Some("info") | Some("INFO") => LevelFilter::Info,
        Some("debug") | Some("DEBUG") => LevelFilter::Debug,
        Some("trace") | Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the kernel logger with the build-time level
pub fn init(sink: LogSink) -> Result<(), SetLoggerError> {
    init_with_level(sink, level_from_env())
}

/// Install the kernel logger with an explicit level
pub fn init_with_level(sink: LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    SINK.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Sink writing to the host's standard error
#[cfg(any(test, feature = "std"))]
pub fn stderr_sink(args: fmt::Arguments<'_>) {
    eprint!("{}", args);
}
