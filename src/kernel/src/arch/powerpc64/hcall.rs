//! PAPR hypervisor calls.

use core::arch::asm;

use perch_hal::HcallError;

pub const H_SUCCESS: i64 = 0;

pub const H_GET_TERM_CHAR: u64 = 0x54;
pub const H_PUT_TERM_CHAR: u64 = 0x58;
pub const H_CEDE: u64 = 0xe0;
pub const H_SET_MODE: u64 = 0x31c;

/// `H_SET_MODE` resource selecting the endianness of interrupts.
pub const H_SET_MODE_RESOURCE_LE: u64 = 4;

/// Issue hypervisor call `opcode` with up to four arguments.
///
/// Returns the status word and the first three return registers.
///
/// # Safety
///
/// Must run in a PAPR guest; the effect depends entirely on `opcode`.
pub unsafe fn hcall(opcode: u64, args: [u64; 4]) -> (i64, [u64; 3]) {
    let status: i64;
    let (r4, r5, r6): (u64, u64, u64);
    asm!(
        "sc 1",
        inlateout("r3") opcode as i64 => status,
        inlateout("r4") args[0] => r4,
        inlateout("r5") args[1] => r5,
        inlateout("r6") args[2] => r6,
        inlateout("r7") args[3] => _,
        clobber_abi("C"),
        options(nostack),
    );
    (status, [r4, r5, r6])
}

/// [`hcall`] with the status turned into a `Result`.
///
/// # Safety
///
/// See [`hcall`].
pub unsafe fn hcall_checked(opcode: u64, args: [u64; 4]) -> Result<[u64; 3], HcallError> {
    match hcall(opcode, args) {
        (H_SUCCESS, rets) => Ok(rets),
        (status, _) => Err(HcallError(status)),
    }
}

/// Select the interrupt endianness matching this build.
pub fn set_interrupt_endianness() -> Result<(), HcallError> {
    let little_endian = u64::from(cfg!(target_endian = "little"));
    // SAFETY: H_SET_MODE only changes how the partition takes interrupts.
    unsafe { hcall_checked(H_SET_MODE, [little_endian, H_SET_MODE_RESOURCE_LE, 0, 0]) }
        .map(|_| ())
}
