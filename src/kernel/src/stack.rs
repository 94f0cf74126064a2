//! Back-chain stack walker for fault diagnostics.
//!
//! Every frame starts with a back-chain word pointing at the caller's frame;
//! the caller's frame holds the return address in its LR save slot. Frames
//! pushed by the interrupt entry trampoline are recognized by their return
//! address and carry a saved [`TrapFrame`](crate::trap::TrapFrame) just past
//! the minimum frame.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::trap::{NIP_OFFSET, TRAP_OFFSET};

/// Size of the minimum ABI frame preceding a saved register frame.
pub const STACK_FRAME_OVERHEAD: usize = 112;

/// Offset of the LR save slot within a frame.
pub const LR_SAVE_OFFSET: usize = 16;

/// Read access to stack memory.
pub trait FrameMemory {
    /// Read the word at `addr`.
    fn load(&self, addr: usize) -> usize;

    /// Return address that identifies an interrupt entry frame.
    fn trampoline_marker(&self) -> usize;
}

/// Guards against walking while a walk is already in progress.
pub struct StackWalker {
    walking: AtomicBool,
}

impl StackWalker {
    pub const fn new() -> Self {
        Self {
            walking: AtomicBool::new(false),
        }
    }

    /// Collect return addresses starting with the one `frame` returns to.
    ///
    /// Interrupt entries appear as their vector number followed by the
    /// interrupted instruction address. Returns the number of entries
    /// written to `out`.
    pub fn walk<M: FrameMemory + ?Sized>(&self, mem: &M, frame: usize, out: &mut [usize]) -> usize {
        if self.walking.swap(true, Ordering::Acquire) {
            log::error!("recursive stack walk");
            return 0;
        }

        let marker = mem.trampoline_marker();
        // Frame addresses come from a possibly corrupted stack.
        let return_address = |bp: usize| {
            if bp == 0 {
                0
            } else {
                mem.load(bp.wrapping_add(LR_SAVE_OFFSET))
            }
        };

        let mut bp = if frame == 0 { 0 } else { mem.load(frame) };
        let mut ret = return_address(bp);
        let mut depth = 0;

        while bp != 0 && depth < out.len() && ret != 0 {
            if ret == marker {
                let regs = bp.wrapping_add(STACK_FRAME_OVERHEAD);
                out[depth] = mem.load(regs.wrapping_add(TRAP_OFFSET));
                bp = mem.load(bp);
                ret = mem.load(regs.wrapping_add(NIP_OFFSET));
            } else {
                out[depth] = ret;
                bp = mem.load(bp);
                ret = return_address(bp);
            }
            depth += 1;
        }

        self.walking.store(false, Ordering::Release);
        depth
    }
}

impl Default for StackWalker {
    fn default() -> Self {
        Self::new()
    }
}

static WALKER: StackWalker = StackWalker::new();

/// Walk from `frame` with the shared walker.
pub fn backtrace_frame<M: FrameMemory + ?Sized>(mem: &M, frame: usize, out: &mut [usize]) -> usize {
    WALKER.walk(mem, frame, out)
}

/// Print `pc` followed by the call chain starting at `frame`.
pub fn print_backtrace<M: FrameMemory + ?Sized>(mem: &M, pc: usize, frame: usize) {
    let mut addrs = [0usize; 50];
    let depth = backtrace_frame(mem, frame, &mut addrs);

    crate::print!("\tSTACK: {:#x}", pc);
    for addr in &addrs[..depth] {
        crate::print!(" {:#x}", addr);
    }
    crate::println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use core::cell::Cell;

    const MARKER: usize = 0xc0de;

    struct Memory(BTreeMap<usize, usize>);

    impl Memory {
        fn frame(mut self, at: usize, back_chain: usize, lr: usize) -> Self {
            self.0.insert(at, back_chain);
            self.0.insert(at + LR_SAVE_OFFSET, lr);
            self
        }

        fn trap_regs(mut self, frame: usize, vector: usize, nip: usize) -> Self {
            let regs = frame + STACK_FRAME_OVERHEAD;
            self.0.insert(regs + TRAP_OFFSET, vector);
            self.0.insert(regs + NIP_OFFSET, nip);
            self
        }
    }

    impl FrameMemory for Memory {
        fn load(&self, addr: usize) -> usize {
            self.0.get(&addr).copied().unwrap_or(0)
        }

        fn trampoline_marker(&self) -> usize {
            MARKER
        }
    }

    // 0x1000 -> 0x2000 -> 0x3000 (trampoline) -> 0x4000 -> 0x5000 -> 0x6000 -> end
    fn interrupted_chain() -> Memory {
        Memory(BTreeMap::new())
            .frame(0x1000, 0x2000, 0)
            .frame(0x2000, 0x3000, 0xaaa)
            .frame(0x3000, 0x4000, MARKER)
            .trap_regs(0x3000, 0x900, 0xbbb)
            .frame(0x4000, 0x5000, 0)
            .frame(0x5000, 0x6000, 0xccc)
            .frame(0x6000, 0, 0xddd)
    }

    #[test]
    fn test_trampoline_frame_becomes_vector_and_nip() {
        let walker = StackWalker::new();
        let mut out = [0usize; 8];

        let depth = walker.walk(&interrupted_chain(), 0x1000, &mut out);
        assert_eq!(&out[..depth], [0xaaa, 0x900, 0xbbb, 0xccc, 0xddd]);
    }

    #[test]
    fn test_depth_budget_is_respected() {
        let walker = StackWalker::new();
        let mut out = [0usize; 2];

        assert_eq!(walker.walk(&interrupted_chain(), 0x1000, &mut out), 2);
        assert_eq!(out, [0xaaa, 0x900]);
    }

    #[test]
    fn test_trampoline_two_frames_down() {
        // Return addresses 0xa1, 0xa2, then the trampoline, then 0xa4 onward.
        let mem = Memory(BTreeMap::new())
            .frame(0x1000, 0x2000, 0)
            .frame(0x2000, 0x3000, 0xa1)
            .frame(0x3000, 0x4000, 0xa2)
            .frame(0x4000, 0x5000, MARKER)
            .trap_regs(0x4000, 0x500, 0x1234)
            .frame(0x5000, 0x6000, 0)
            .frame(0x6000, 0x7000, 0xa4)
            .frame(0x7000, 0x8000, 0xa5)
            .frame(0x8000, 0, 0xa6);
        let walker = StackWalker::new();
        let mut out = [0usize; 6];

        let depth = walker.walk(&mem, 0x1000, &mut out);
        assert_eq!(depth, 6);
        assert_eq!(out[2], 0x500);
        assert_eq!(out[3], 0x1234);
        assert_eq!(out, [0xa1, 0xa2, 0x500, 0x1234, 0xa4, 0xa5]);
    }

    #[test]
    fn test_wild_back_chain_does_not_overflow() {
        let mem = Memory(BTreeMap::new()).frame(0x1000, usize::MAX - 8, 0);
        let walker = StackWalker::new();
        let mut out = [0usize; 4];

        assert_eq!(walker.walk(&mem, 0x1000, &mut out), 0);
    }

    #[test]
    fn test_zero_return_address_ends_walk() {
        let mem = Memory(BTreeMap::new())
            .frame(0x1000, 0x2000, 0)
            .frame(0x2000, 0x3000, 0x111)
            .frame(0x3000, 0x4000, 0);
        let walker = StackWalker::new();
        let mut out = [0usize; 8];

        assert_eq!(walker.walk(&mem, 0x1000, &mut out), 1);
        assert_eq!(out[0], 0x111);
    }

    struct Reentrant<'a> {
        inner: Memory,
        walker: &'a StackWalker,
        nested: Cell<Option<usize>>,
    }

    impl FrameMemory for Reentrant<'_> {
        fn load(&self, addr: usize) -> usize {
            if self.nested.get().is_none() {
                let mut out = [0usize; 4];
                self.nested
                    .set(Some(self.walker.walk(&self.inner, 0x1000, &mut out)));
            }
            self.inner.load(addr)
        }

        fn trampoline_marker(&self) -> usize {
            MARKER
        }
    }

    #[test]
    fn test_nested_walk_returns_zero() {
        let walker = StackWalker::new();
        let mem = Reentrant {
            inner: interrupted_chain(),
            walker: &walker,
            nested: Cell::new(None),
        };
        let mut out = [0usize; 8];

        let depth = walker.walk(&mem, 0x1000, &mut out);
        assert_eq!(mem.nested.get(), Some(0));
        assert_eq!(depth, 5);

        // The walker is usable again afterwards.
        assert_eq!(walker.walk(&interrupted_chain(), 0x1000, &mut out), 5);
    }
}
