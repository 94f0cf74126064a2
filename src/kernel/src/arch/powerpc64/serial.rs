//! Hypervisor virtual terminal.
//!
//! Characters go through `H_PUT_TERM_CHAR` on terminal 0. The console
//! module serializes access; this driver keeps no state.

use perch_hal::Serial;

use super::hcall::{hcall, H_GET_TERM_CHAR, H_PUT_TERM_CHAR};

const TERMINAL: u64 = 0;

/// The partition's first virtual terminal.
pub struct HvTerminal;

impl Serial for HvTerminal {
    fn write_byte(&mut self, byte: u8) {
        // SAFETY: writing one character to the partition's own terminal.
        unsafe {
            hcall(H_PUT_TERM_CHAR, [TERMINAL, 1, u64::from(byte) << 56, 0]);
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        // SAFETY: reading from the partition's own terminal.
        let (status, [len, chars, _]) = unsafe { hcall(H_GET_TERM_CHAR, [TERMINAL, 0, 0, 0]) };
        (status == 0 && len > 0).then_some((chars >> 56) as u8)
    }
}

static mut TERMINAL_DEVICE: HvTerminal = HvTerminal;

/// The terminal as a console device.
///
/// # Safety
///
/// Must be called at most once; the returned reference is unique.
pub unsafe fn terminal() -> &'static mut HvTerminal {
    &mut *core::ptr::addr_of_mut!(TERMINAL_DEVICE)
}
