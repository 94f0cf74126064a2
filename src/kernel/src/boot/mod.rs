//! Machine bring-up and boot logging.
//!
//! Boot messages use Linux-style status brackets on the console.

pub mod relocate;
pub mod setup;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Display;
use spin::Once;

pub use setup::{discover_machine, Machine};

#[cfg(target_arch = "powerpc64")]
pub use setup::setup;

use crate::println;

/// Boot status indicators.
#[derive(Debug, Clone, Copy)]
pub enum Status {
    /// Success - `[ OK ]`
    Ok,
    /// Failure - `[FAIL]`
    Fail,
    /// Warning - `[WARN]`
    Warn,
    /// Informational - `[INFO]`
    Info,
}

impl Status {
    fn tag(self) -> &'static str {
        match self {
            Status::Ok => "[ OK ]",
            Status::Fail => "[FAIL]",
            Status::Warn => "[WARN]",
            Status::Info => "[INFO]",
        }
    }
}

/// Log a boot stage with status.
///
/// Format: `[ OK ] Message text`
pub fn log(status: Status, message: impl Display) {
    println!("{} {}", status.tag(), message);
}

/// Log an indented detail line (for sub-items).
pub fn log_detail(message: impl Display) {
    println!("       {}", message);
}

static MACHINE: Once<Machine> = Once::new();
static ENVIRONMENT: Once<Vec<u8>> = Once::new();
static BOOTARGS: Once<String> = Once::new();

/// The machine model, once bring-up has finished.
pub fn machine() -> Option<&'static Machine> {
    MACHINE.get()
}

/// Number of hardware threads described by the device tree.
pub fn nr_cpus_present() -> usize {
    machine().map_or(0, |m| m.topology.nr_present())
}

/// Raw initial environment handed over by the loader.
pub fn environment() -> Option<&'static [u8]> {
    ENVIRONMENT.get().map(Vec::as_slice)
}

/// Kernel command line.
pub fn bootargs() -> Option<&'static str> {
    BOOTARGS.get().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tags_line_up() {
        let tags = [Status::Ok, Status::Fail, Status::Warn, Status::Info].map(Status::tag);
        assert_eq!(tags, ["[ OK ]", "[FAIL]", "[WARN]", "[INFO]"]);
        assert!(tags.iter().all(|tag| tag.len() == 6));
    }
}
