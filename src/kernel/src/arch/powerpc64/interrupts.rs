//! Rust side of the exception vectors.
//!
//! The vector entry code saves a [`TrapFrame`] behind a frame whose return
//! address is `exception_stack_marker`, then calls [`do_handle_exception`].

use crate::exit;
use crate::println;
use crate::smp::CPUS;
use crate::stack::{self, FrameMemory};
use crate::trap::{self, TrapFrame, TRAPS};

use super::Ppc64;

extern "C" {
    /// Return address planted by the vector entry code.
    static exception_stack_marker: u8;
}

/// Stack memory of the running CPU.
pub struct RawFrames;

impl FrameMemory for RawFrames {
    fn load(&self, addr: usize) -> usize {
        // SAFETY: only called on back-chain words and LR save slots, which
        // lie inside the live stack.
        unsafe { core::ptr::read_volatile(addr as *const usize) }
    }

    fn trampoline_marker(&self) -> usize {
        // SAFETY: taking the address of a linker symbol.
        unsafe { core::ptr::addr_of!(exception_stack_marker) as usize }
    }
}

/// Entry from the vector code with the saved register frame.
#[no_mangle]
pub extern "C" fn do_handle_exception(regs: *mut TrapFrame) {
    // SAFETY: the vector code passes the frame it just saved on this CPU's
    // exception stack; nothing else references it until we return.
    let frame = unsafe { &mut *regs };

    if let Err(unhandled) = trap::dispatch(&Ppc64, &CPUS, &TRAPS, frame) {
        println!("{}", unhandled);
        stack::print_backtrace(&RawFrames, frame.nip as usize, frame.sp() as usize);
        exit::abort();
    }
}
