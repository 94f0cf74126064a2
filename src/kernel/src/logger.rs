//! `log` backend writing to the console.

use log::{Level, Log, Metadata, Record};

use crate::{config, println};

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= config::LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        println!("[{}] {}: {}", tag, record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Route `log` records to the console.
///
/// Only the first call has an effect.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(config::LOG_LEVEL);
    }
}
