//! Exception vector table and dispatch.
//!
//! The low-level vector entry code (outside this crate) saves the
//! interrupted state into a [`TrapFrame`] on the exception stack, switches
//! to the exception stack marker frame and calls `do_handle_exception`,
//! which lands in [`dispatch`]. Handlers are plain functions taking the
//! frame and an opaque data word registered next to them.

use core::fmt;
use core::mem::{offset_of, size_of};
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use perch_common::TrapError;
use perch_hal::Processor;

use crate::smp::CpuTable;

/// Machine state register bits the core touches.
pub mod msr {
    /// External interrupt enable
    pub const EE: u64 = 1 << 15;
    /// Machine check enable
    pub const ME: u64 = 1 << 12;
    /// Hypervisor state
    pub const HV: u64 = 1 << 60;
}

/// Architected interrupt vector offsets.
pub mod vector {
    pub const SYSTEM_RESET: u32 = 0x100;
    pub const MACHINE_CHECK: u32 = 0x200;
    pub const DATA_STORAGE: u32 = 0x300;
    pub const INSTRUCTION_STORAGE: u32 = 0x400;
    pub const EXTERNAL: u32 = 0x500;
    pub const ALIGNMENT: u32 = 0x600;
    pub const PROGRAM: u32 = 0x700;
    pub const DECREMENTER: u32 = 0x900;
    pub const SYSTEM_CALL: u32 = 0xc00;
    pub const EMULATION_ASSIST: u32 = 0xe40;
}

/// Number of dispatchable vectors: every 0x20 bytes below 0x1000.
pub const NR_VECTORS: usize = 128;

/// Register state saved by the vector entry code.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct TrapFrame {
    pub gpr: [u64; 32],
    pub nip: u64,
    pub msr: u64,
    pub ctr: u64,
    pub link: u64,
    pub xer: u64,
    pub ccr: u64,
    /// Vector offset of the interrupt that produced this frame.
    pub trap: u64,
    pub dar: u64,
    pub dsisr: u64,
    _pad: u64,
}

const _: () = assert!(size_of::<TrapFrame>() % 16 == 0);

/// Offset of the saved vector number, read by the stack walker.
pub const TRAP_OFFSET: usize = offset_of!(TrapFrame, trap);
/// Offset of the saved instruction pointer, read by the stack walker.
pub const NIP_OFFSET: usize = offset_of!(TrapFrame, nip);

impl TrapFrame {
    /// Create a zeroed frame for the given vector.
    pub fn for_vector(vector: u32) -> Self {
        Self {
            trap: u64::from(vector),
            ..Self::default()
        }
    }

    /// Stack pointer at the time of the interrupt.
    pub fn sp(&self) -> u64 {
        self.gpr[1]
    }
}

/// A trap handler: receives the saved frame and its registered data word.
pub type TrapHandler = fn(&mut TrapFrame, usize);

struct Slot {
    occupied: AtomicBool,
    handler: AtomicPtr<()>,
    data: AtomicUsize,
}

impl Slot {
    #[allow(clippy::declare_interior_mutable_const)]
    const FREE: Slot = Slot {
        occupied: AtomicBool::new(false),
        handler: AtomicPtr::new(ptr::null_mut()),
        data: AtomicUsize::new(0),
    };
}

/// One handler slot per vector.
pub struct TrapTable {
    slots: [Slot; NR_VECTORS],
}

impl TrapTable {
    /// Create a table with every slot free.
    pub const fn new() -> Self {
        Self {
            slots: [Slot::FREE; NR_VECTORS],
        }
    }

    fn slot(&self, vector: u32) -> Result<&Slot, TrapError> {
        if vector & 0x1f != 0 {
            return Err(TrapError::MisalignedVector(vector));
        }
        self.slots
            .get((vector >> 5) as usize)
            .ok_or(TrapError::MisalignedVector(vector))
    }

    /// Install `handler` with `data` on `vector`, or clear the slot when
    /// `handler` is `None`.
    ///
    /// Installing on an occupied slot fails; clearing a free slot is allowed.
    pub fn install(
        &self,
        vector: u32,
        handler: Option<TrapHandler>,
        data: usize,
    ) -> Result<(), TrapError> {
        let slot = self.slot(vector)?;
        match handler {
            Some(handler) => {
                if slot.occupied.load(Ordering::Acquire) {
                    return Err(TrapError::AlreadyInstalled(vector));
                }
                slot.handler.store(handler as *mut (), Ordering::Relaxed);
                slot.data.store(data, Ordering::Relaxed);
                slot.occupied.store(true, Ordering::Release);
            }
            None => {
                slot.occupied.store(false, Ordering::Release);
                slot.handler.store(ptr::null_mut(), Ordering::Relaxed);
                slot.data.store(0, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Returns whether a handler is installed on `vector`.
    pub fn is_installed(&self, vector: u32) -> bool {
        self.slot(vector)
            .map(|slot| slot.occupied.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Invoke the handler for the frame's vector.
    ///
    /// Returns false when no handler is installed.
    pub fn invoke(&self, frame: &mut TrapFrame) -> bool {
        let Some(slot) = self.slots.get((frame.trap >> 5) as usize) else {
            return false;
        };
        if !slot.occupied.load(Ordering::Acquire) {
            return false;
        }
        let ptr = slot.handler.load(Ordering::Relaxed);
        if ptr.is_null() {
            return false;
        }
        let data = slot.data.load(Ordering::Relaxed);

        // Safety: only `TrapHandler` values are ever stored in the slot.
        let handler = unsafe { core::mem::transmute::<*mut (), TrapHandler>(ptr) };
        handler(frame, data);
        true
    }
}

impl Default for TrapTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Report for an interrupt nobody claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnhandledTrap {
    /// Hardware thread id, or `None` if the scratch register is bogus.
    pub cpu: Option<u64>,
    pub vector: u64,
    pub nip: u64,
    pub msr: u64,
    pub sp: u64,
}

impl fmt::Display for UnhandledTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cpu {
            Some(cpu) => write!(f, "Unhandled CPU{} exception {:#x}", cpu, self.vector)?,
            None => write!(f, "Unhandled exception {:#x}", self.vector)?,
        }
        write!(f, " at NIA:0x{:016x} MSR:0x{:016x}", self.nip, self.msr)
    }
}

/// Route a trap to its handler.
pub fn dispatch<P: Processor>(
    cpu: &P,
    cpus: &CpuTable,
    traps: &TrapTable,
    frame: &mut TrapFrame,
) -> Result<(), UnhandledTrap> {
    if traps.invoke(frame) {
        return Ok(());
    }

    Err(UnhandledTrap {
        cpu: cpus.current(cpu).map(|desc| desc.server_no()),
        vector: frame.trap,
        nip: frame.nip,
        msr: frame.msr,
        sp: frame.sp(),
    })
}

/// The machine's trap table, consulted by the vector entry code.
pub static TRAPS: TrapTable = TrapTable::new();

/// Install or clear a handler on the global trap table.
///
/// Installing twice on the same vector is a programming error in the
/// caller and aborts the run.
pub fn handle_exception(vector: u32, handler: Option<TrapHandler>, data: usize) {
    if let Err(err) = TRAPS.install(vector, handler, data) {
        crate::exit::fatal(err);
    }
}
