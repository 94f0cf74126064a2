//! Run termination.
//!
//! The harness reads the run's outcome from the console: the first call to
//! [`exit`] prints `EXIT: STATUS=<(code << 1) | 1>` and then powers the
//! machine off, or halts where firmware power-off is unavailable. The
//! status line is printed at most once even if several CPUs race to exit.

use core::fmt::Display;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::boot::{self, Status};
use crate::{arch, println};

/// Exit code used by [`abort`].
pub const ABORT_CODE: i32 = 64;

static EXITING: AtomicBool = AtomicBool::new(false);

/// Status value printed for `code`. The low bit is always set.
pub const fn exit_status(code: i32) -> i32 {
    (code << 1) | 1
}

/// Report `code` and stop the machine.
pub fn exit(code: i32) -> ! {
    if !EXITING.swap(true, Ordering::AcqRel) {
        println!("\nEXIT: STATUS={}", exit_status(code));
        arch::power_off(code)
    }
    arch::halt(code)
}

/// Abnormal termination.
pub fn abort() -> ! {
    exit(ABORT_CODE)
}

/// Print `err` and abort.
///
/// Goes straight to the console: the logger may not be up yet.
pub fn fatal(err: impl Display) -> ! {
    boot::log(Status::Fail, err);
    abort()
}
