//! 64-bit POWER support.
//!
//! [`Ppc64`] implements the HAL traits on the registers of the calling CPU.

pub mod hcall;
pub mod interrupts;
pub mod opal;
pub mod serial;

use core::arch::asm;
use core::cell::UnsafeCell;

use perch_hal::{HcallError, Hypervisor, LocalInterrupts, Processor, Timebase};

use crate::config::EXCEPTION_STACK_SIZE;
use crate::trap::msr;

const SPR_SPRG0: u32 = 272;

/// Reads the machine state register.
#[inline]
pub fn mfmsr() -> u64 {
    let value: u64;
    // SAFETY: reading MSR has no side effects.
    unsafe { asm!("mfmsr {}", out(reg) value, options(nomem, nostack)) };
    value
}

/// Writes the EE and RI bits of the machine state register.
#[inline]
fn mtmsrd_l1(value: u64) {
    // SAFETY: the L=1 form only updates EE and RI.
    unsafe { asm!("mtmsrd {}, 1", in(reg) value, options(nostack)) };
}

/// Write MSR through `rfid`, the only way to change bits `mtmsrd` leaves
/// alone.
///
/// # Safety
///
/// `value` must describe a state the kernel can run in.
unsafe fn rfid_msr(value: u64) {
    asm!(
        "mtsrr1 {msr}",
        "bl 1f",
        "1: mflr {tmp}",
        "addi {tmp}, {tmp}, 2f - 1b",
        "mtsrr0 {tmp}",
        "rfid",
        "2:",
        msr = in(reg) value,
        tmp = out(reg_nonzero) _,
        clobber_abi("C"),
    );
}

/// Turn on machine check interrupts for the calling CPU.
pub fn enable_mcheck() {
    // SAFETY: only MSR[ME] changes.
    unsafe { rfid_msr(mfmsr() | msr::ME) };
}

/// Turn off machine check interrupts for the calling CPU.
pub fn disable_mcheck() {
    // SAFETY: only MSR[ME] changes.
    unsafe { rfid_msr(mfmsr() & !msr::ME) };
}

/// Handle on the calling CPU's registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc64;

impl Processor for Ppc64 {
    fn version(&self) -> u32 {
        let pvr: u64;
        // SAFETY: PVR is read-only.
        unsafe { asm!("mfpvr {}", out(reg) pvr, options(nomem, nostack)) };
        pvr as u32
    }

    fn hypervisor_mode(&self) -> bool {
        mfmsr() & msr::HV != 0
    }

    fn scratch(&self) -> usize {
        let value: usize;
        // SAFETY: SPRG0 is reserved for the descriptor index.
        unsafe { asm!("mfspr {}, {spr}", out(reg) value, spr = const SPR_SPRG0, options(nomem, nostack)) };
        value
    }

    fn set_scratch(&self, value: usize) {
        // SAFETY: SPRG0 is reserved for the descriptor index.
        unsafe { asm!("mtspr {spr}, {}", in(reg) value, spr = const SPR_SPRG0, options(nomem, nostack)) };
    }
}

impl Timebase for Ppc64 {
    const DECREMENTER_MAX: u64 = 0x7fff_ffff;

    fn read_timebase(&self) -> u64 {
        let tb: u64;
        // SAFETY: reading the timebase has no side effects.
        unsafe { asm!("mftb {}", out(reg) tb, options(nomem, nostack)) };
        tb
    }

    fn set_decrementer(&self, ticks: u64) {
        let ticks = ticks.min(Self::DECREMENTER_MAX);
        // SAFETY: the decrementer only raises an interrupt on this CPU.
        unsafe { asm!("mtdec {}", in(reg) ticks, options(nomem, nostack)) };
    }

    fn relax(&self) {
        // SAFETY: SMT priority hints; low then medium.
        unsafe { asm!("or 1,1,1", "or 2,2,2", options(nomem, nostack)) };
    }
}

impl LocalInterrupts for Ppc64 {
    fn enable(&self) {
        mtmsrd_l1(mfmsr() | msr::EE);
    }

    fn disable(&self) {
        mtmsrd_l1(mfmsr() & !msr::EE);
    }

    fn are_enabled(&self) -> bool {
        mfmsr() & msr::EE != 0
    }
}

impl Hypervisor for Ppc64 {
    fn can_cede(&self) -> bool {
        crate::features::machine_is_pseries()
    }

    fn cede(&self) -> Result<(), HcallError> {
        // SAFETY: H_CEDE suspends this CPU until an interrupt is pending.
        unsafe { hcall::hcall_checked(hcall::H_CEDE, [0; 4]) }.map(|_| ())
    }
}

/// Statically reserved exception stack of the boot CPU.
#[repr(C, align(4096))]
pub struct BootExceptionStack(UnsafeCell<[u8; EXCEPTION_STACK_SIZE]>);

// SAFETY: only the boot CPU's vector code touches the memory.
unsafe impl Sync for BootExceptionStack {}

pub static BOOT_EXCEPTION_STACK: BootExceptionStack =
    BootExceptionStack(UnsafeCell::new([0; EXCEPTION_STACK_SIZE]));

impl BootExceptionStack {
    pub fn base(&self) -> u64 {
        self.0.get() as u64
    }
}

extern "C" {
    /// Top of the boot stack, from the linker script.
    static stacktop: u8;
}

/// First byte after the boot stack: the initial free-memory cursor.
pub fn stack_top() -> usize {
    // SAFETY: taking the address of a linker symbol.
    unsafe { core::ptr::addr_of!(stacktop) as usize }
}

/// Current stack pointer.
#[inline(always)]
pub fn frame_address() -> usize {
    let sp: usize;
    // SAFETY: copies r1.
    unsafe { asm!("mr {}, 1", out(reg) sp, options(nomem, nostack)) };
    sp
}

/// Stop the calling CPU for good.
pub fn halt(_code: i32) -> ! {
    Ppc64.disable();
    loop {
        // SAFETY: lowest SMT priority while parked.
        unsafe { asm!("or 31,31,31", options(nomem, nostack)) };
    }
}

/// Power the machine off through firmware where the kernel can, otherwise
/// halt.
pub fn power_off(code: i32) -> ! {
    if crate::features::machine_is_powernv() {
        if let Some(fw) = opal::firmware() {
            opal::power_off(fw);
        }
    }
    halt(code)
}

/// Rust entry of a secondary CPU.
///
/// The start code loads the descriptor's stack and passes its index; the
/// descriptor's entry word holds the `fn(u64)` given to
/// [`crate::smp::prepare_secondary`].
#[no_mangle]
pub extern "C" fn perch_secondary_main(index: usize) -> ! {
    enable_mcheck();
    let entry = match crate::smp::CPUS.get(index) {
        Some(desc) => desc.entry() as usize,
        None => crate::exit::fatal("secondary CPU started without a descriptor"),
    };
    // SAFETY: `prepare_secondary` stored the address of a `fn(u64)`.
    let entry = unsafe { core::mem::transmute::<usize, fn(u64)>(entry) };
    crate::smp::secondary_main(&Ppc64, index, entry);
    halt(0)
}
