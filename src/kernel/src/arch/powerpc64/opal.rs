//! OPAL firmware calls for bare-metal ("powernv") machines.
//!
//! OPAL runs big-endian with external interrupts off. A call enters the
//! firmware through `hrfid` with `MSR[LE]` and `MSR[EE]` cleared and comes
//! back through a byte-reversed trampoline that restores the kernel's
//! endianness before anything else runs.

use core::arch::asm;
use core::fmt;

use perch_hal::Serial;
use spin::Once;

use crate::devicetree::FirmwareEntry;

pub const OPAL_SUCCESS: i64 = 0;

pub const OPAL_CONSOLE_WRITE: u64 = 1;
pub const OPAL_CONSOLE_READ: u64 = 2;
pub const OPAL_CEC_POWER_DOWN: u64 = 5;
pub const OPAL_POLL_EVENTS: u64 = 10;
pub const OPAL_REINIT_CPUS: u64 = 70;

pub const OPAL_REINIT_CPUS_HILE_BE: u64 = 1 << 0;
pub const OPAL_REINIT_CPUS_HILE_LE: u64 = 1 << 1;

const SPR_HSRR0: u32 = 314;
const SPR_HSRR1: u32 = 315;

/// Default virtual terminal.
const VTY: u64 = 0;

/// Non-success status returned by OPAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpalError(pub i64);

impl fmt::Display for OpalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OPAL call failed ({})", self.0)
    }
}

static FIRMWARE: Once<FirmwareEntry> = Once::new();

/// The registered firmware entry, if [`init`] has run.
pub fn firmware() -> Option<&'static FirmwareEntry> {
    FIRMWARE.get()
}

/// Call OPAL function `token`.
///
/// # Safety
///
/// `fw` must describe the running firmware, and pointer arguments must be
/// real addresses OPAL may access.
pub unsafe fn opal_call(fw: &FirmwareEntry, token: u64, args: [u64; 3]) -> i64 {
    let status: i64;
    asm!(
        "stdu 1, -48(1)",
        "std 2, 24(1)",
        "std 13, 32(1)",
        "mfmsr {msr}",
        "std {msr}, 40(1)",
        "li {tmp}, 1",
        "ori {tmp}, {tmp}, 0x8000",
        "andc {msr}, {msr}, {tmp}",
        "mtspr {hsrr1}, {msr}",
        "mtspr {hsrr0}, {entry}",
        "bl 1f",
        "1: mflr {tmp}",
        "addi {tmp}, {tmp}, 2f - 1b",
        "mtlr {tmp}",
        "mr 2, {base}",
        "hrfid",
        // Reads as `b .+8` when executed with the wrong endianness.
        "2: tdi 0, 0, 0x48",
        "b 3f",
        ".long 0xa600607d", // mfmsr r11
        ".long 0x01006b69", // xori r11,r11,1
        ".long 0x00004039", // li r10,0
        ".long 0x6401417d", // mtmsrd r10,1
        ".long 0x05009f42", // bcl 20,31,$+4
        ".long 0xa602487d", // mflr r10
        ".long 0x14004a39", // addi r10,r10,20
        ".long 0xa6035a7d", // mtsrr0 r10
        ".long 0xa6037b7d", // mtsrr1 r11
        ".long 0x2400004c", // rfid
        "3: ld 2, 24(1)",
        "ld 13, 32(1)",
        "ld {msr}, 40(1)",
        "mtmsrd {msr}, 1",
        "addi 1, 1, 48",
        entry = in(reg) fw.entry,
        base = in(reg) fw.base,
        msr = out(reg_nonzero) _,
        tmp = out(reg_nonzero) _,
        hsrr0 = const SPR_HSRR0,
        hsrr1 = const SPR_HSRR1,
        in("r0") token,
        inlateout("r3") args[0] as i64 => status,
        in("r4") args[1],
        in("r5") args[2],
        clobber_abi("C"),
    );
    status
}

/// Register the firmware and switch its interrupts to this build's
/// endianness. Later calls are ignored.
///
/// # Safety
///
/// `fw` must come from the machine's `/ibm,opal` node.
pub unsafe fn init(fw: FirmwareEntry) -> Result<(), OpalError> {
    let fw = FIRMWARE.call_once(|| fw);
    let hile = if cfg!(target_endian = "little") {
        OPAL_REINIT_CPUS_HILE_LE
    } else {
        OPAL_REINIT_CPUS_HILE_BE
    };
    match opal_call(fw, OPAL_REINIT_CPUS, [hile, 0, 0]) {
        OPAL_SUCCESS => Ok(()),
        status => Err(OpalError(status)),
    }
}

/// Turn the machine off. Only returns by not returning.
pub fn power_off(fw: &FirmwareEntry) -> ! {
    // SAFETY: neither call takes pointer arguments.
    unsafe {
        opal_call(fw, OPAL_CEC_POWER_DOWN, [0; 3]);
        loop {
            opal_call(fw, OPAL_POLL_EVENTS, [0; 3]);
        }
    }
}

/// Console on the firmware's default terminal.
pub struct OpalConsole;

impl Serial for OpalConsole {
    fn write_byte(&mut self, byte: u8) {
        let Some(fw) = firmware() else { return };
        let count = 1u64.to_be();
        // SAFETY: both buffers live on this stack for the whole call.
        unsafe {
            opal_call(
                fw,
                OPAL_CONSOLE_WRITE,
                [VTY, &count as *const u64 as u64, &byte as *const u8 as u64],
            );
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let fw = firmware()?;
        let mut count = 1u64.to_be();
        let mut byte = 0u8;
        // SAFETY: both buffers live on this stack for the whole call.
        let status = unsafe {
            opal_call(
                fw,
                OPAL_CONSOLE_READ,
                [VTY, &mut count as *mut u64 as u64, &mut byte as *mut u8 as u64],
            )
        };
        (status == OPAL_SUCCESS && u64::from_be(count) > 0).then_some(byte)
    }
}

static mut CONSOLE_DEVICE: OpalConsole = OpalConsole;

/// The firmware terminal as a console device.
///
/// # Safety
///
/// Must be called at most once; the returned reference is unique.
pub unsafe fn console() -> &'static mut OpalConsole {
    &mut *core::ptr::addr_of_mut!(CONSOLE_DEVICE)
}
