/*
 * Kernel logger
 *
 * Wires the `log` facade to the registered console sink. Records are
 * formatted straight through `core::fmt` into the sink, so logging works
 * as soon as the terminal driver registers (and silently drops output
 * before that).
 */

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record};

use crate::platform;

struct RookLogger;

struct SinkWriter;

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        platform::console_write(s.as_bytes());
        Ok(())
    }
}

impl log::Log for RookLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut w = SinkWriter;
            let _ = writeln!(w, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: RookLogger = RookLogger;

/// Install the kernel logger. Safe to call more than once; only the
/// first call wins (matters for the hosted test harness, which re-inits
/// the core per test).
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
