//! Character console shared by all CPUs.
//!
//! The backing device is registered once during bring-up. Output is
//! serialized by a [`SpinMutex`] so lines from different CPUs do not
//! interleave; before a device is registered output is discarded.

use core::fmt::{self, Write};

use perch_hal::Serial;

use crate::sync::SpinMutex;

type Device = &'static mut (dyn Serial + Send);

static CONSOLE: SpinMutex<Option<Device>> = SpinMutex::new(None);

/// Register the console device.
pub fn install(device: Device) {
    *CONSOLE.lock() = Some(device);
}

/// Returns whether a console device is registered.
pub fn is_installed() -> bool {
    CONSOLE.lock().is_some()
}

/// Read one character from the console, if one is pending.
pub fn getchar() -> Option<u8> {
    CONSOLE.lock().as_mut().and_then(|dev| dev.read_byte())
}

struct Writer<'a>(&'a mut dyn Serial);

impl Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

/// Write formatted output to `serial`.
pub fn write_to(serial: &mut dyn Serial, args: fmt::Arguments) {
    // Writer never fails.
    let _ = Writer(serial).write_fmt(args);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let mut console = CONSOLE.lock();
    if let Some(dev) = console.as_mut() {
        write_to(&mut **dev, args);
    }
}

/// Prints to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Prints to the console, appending a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(
        concat!($fmt, "\n"), $($arg)*));
}
