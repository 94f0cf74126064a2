//! Per-CPU descriptors and secondary CPU accounting.
//!
//! Each started hardware thread owns one [`CpuDescriptor`] in the global
//! [`CPUS`] table. The descriptor's index is kept in the CPU's scratch
//! register so trap handlers can find their CPU without any memory access.

use alloc::alloc::{alloc, handle_alloc_error, Layout};
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use perch_hal::{Processor, Timebase};

use crate::config::{
    CPU_START_TIMEOUT_SECS, EXCEPTION_STACK_SIZE, NR_CPUS, STACK_ALIGN, STACK_RED_ZONE, STACK_SIZE,
};

/// Pattern for fields of a descriptor that has not been claimed.
pub const ABSENT: u64 = u64::MAX;

/// Identity and stacks of one started hardware thread.
#[repr(C)]
pub struct CpuDescriptor {
    server_no: AtomicU64,
    stack: AtomicU64,
    exception_stack: AtomicU64,
    entry: AtomicU64,
}

impl CpuDescriptor {
    #[allow(clippy::declare_interior_mutable_const)]
    const UNCLAIMED: CpuDescriptor = CpuDescriptor {
        server_no: AtomicU64::new(ABSENT),
        stack: AtomicU64::new(ABSENT),
        exception_stack: AtomicU64::new(ABSENT),
        entry: AtomicU64::new(ABSENT),
    };

    /// Hardware thread id.
    pub fn server_no(&self) -> u64 {
        self.server_no.load(Ordering::Acquire)
    }

    /// Initial stack pointer for normal execution.
    pub fn stack(&self) -> u64 {
        self.stack.load(Ordering::Relaxed)
    }

    /// Initial stack pointer for exception handling.
    pub fn exception_stack(&self) -> u64 {
        self.exception_stack.load(Ordering::Relaxed)
    }

    /// Address the secondary start code branches to.
    pub fn entry(&self) -> u64 {
        self.entry.load(Ordering::Relaxed)
    }

    /// Returns whether the descriptor belongs to a started CPU.
    pub fn is_present(&self) -> bool {
        self.server_no() != ABSENT
    }

    fn clear(&self) {
        self.server_no.store(ABSENT, Ordering::Relaxed);
        self.stack.store(ABSENT, Ordering::Relaxed);
        self.exception_stack.store(ABSENT, Ordering::Relaxed);
        self.entry.store(ABSENT, Ordering::Relaxed);
    }
}

/// Append-only table of per-CPU descriptors.
pub struct CpuTable {
    cpus: [CpuDescriptor; NR_CPUS],
    nr_started: AtomicUsize,
    nr_online: AtomicUsize,
}

impl CpuTable {
    /// Create a table with every descriptor unclaimed.
    pub const fn new() -> Self {
        Self {
            cpus: [CpuDescriptor::UNCLAIMED; NR_CPUS],
            nr_started: AtomicUsize::new(0),
            nr_online: AtomicUsize::new(0),
        }
    }

    /// Reset every descriptor to the sentinel pattern.
    pub fn reset(&self) {
        for desc in &self.cpus {
            desc.clear();
        }
        self.nr_started.store(0, Ordering::Release);
        self.nr_online.store(0, Ordering::Release);
    }

    /// Claim descriptor 0 for the boot CPU and point the scratch register
    /// at it.
    ///
    /// The boot CPU keeps the loader's stack; its exception stack is the
    /// statically reserved area starting at `exception_stack_base`.
    pub fn init_boot_cpu<P: Processor>(
        &self,
        cpu: &P,
        server_no: u32,
        exception_stack_base: u64,
    ) -> &CpuDescriptor {
        let desc = &self.cpus[0];
        desc.exception_stack.store(
            stack_pointer(exception_stack_base, EXCEPTION_STACK_SIZE),
            Ordering::Relaxed,
        );
        desc.server_no.store(u64::from(server_no), Ordering::Release);
        self.nr_started.store(1, Ordering::Release);
        self.nr_online.store(1, Ordering::Release);
        cpu.set_scratch(0);
        desc
    }

    /// Claim the next descriptor for `server_no` and give it fresh stacks.
    ///
    /// Returns the descriptor index, or `None` once all slots are taken.
    pub fn bring_up_secondary(&self, server_no: u32, entry: u64) -> Option<usize> {
        let index = self.nr_started.fetch_add(1, Ordering::AcqRel);
        if index >= NR_CPUS {
            self.nr_started.fetch_sub(1, Ordering::AcqRel);
            return None;
        }

        let desc = &self.cpus[index];
        desc.stack
            .store(stack_pointer(allocate_stack(STACK_SIZE), STACK_SIZE), Ordering::Relaxed);
        desc.exception_stack.store(
            stack_pointer(allocate_stack(EXCEPTION_STACK_SIZE), EXCEPTION_STACK_SIZE),
            Ordering::Relaxed,
        );
        desc.entry.store(entry, Ordering::Relaxed);
        desc.server_no.store(u64::from(server_no), Ordering::Release);
        Some(index)
    }

    /// Descriptor of the calling CPU, looked up through its scratch register.
    pub fn current<P: Processor>(&self, cpu: &P) -> Option<&CpuDescriptor> {
        self.cpus.get(cpu.scratch()).filter(|desc| desc.is_present())
    }

    /// Descriptor at `index`, if it has been claimed.
    pub fn get(&self, index: usize) -> Option<&CpuDescriptor> {
        self.cpus.get(index).filter(|desc| desc.is_present())
    }

    /// Number of descriptors claimed so far.
    pub fn nr_started(&self) -> usize {
        self.nr_started.load(Ordering::Acquire).min(NR_CPUS)
    }

    /// Number of CPUs currently running kernel code.
    pub fn nr_online(&self) -> usize {
        self.nr_online.load(Ordering::Acquire)
    }

    /// Record that a CPU entered its secondary entry function.
    pub fn cpu_online(&self) {
        self.nr_online.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that a CPU left its secondary entry function.
    pub fn cpu_offline(&self) {
        self.nr_online.fetch_sub(1, Ordering::AcqRel);
    }

    /// Spin until at least `target` CPUs are online or `timeout` timebase
    /// cycles have passed.
    pub fn wait_for_online<T: Timebase>(&self, tb: &T, target: usize, timeout: u64) -> bool {
        let start = tb.read_timebase();
        loop {
            if self.nr_online() >= target {
                return true;
            }
            if tb.read_timebase().wrapping_sub(start) > timeout {
                return false;
            }
            tb.relax();
        }
    }

    /// Forget every secondary descriptor, keeping the boot CPU's.
    pub fn reset_secondaries(&self) {
        let started = self.nr_started();
        for desc in self.cpus.iter().take(started).skip(1) {
            desc.clear();
        }
        self.nr_started.store(1, Ordering::Release);
    }
}

impl Default for CpuTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Initial stack pointer for a stack occupying `[base, base + size)`.
pub const fn stack_pointer(base: u64, size: usize) -> u64 {
    base + size as u64 - STACK_RED_ZONE as u64
}

/// Allocate a stack from the kernel heap. Stacks are never freed.
fn allocate_stack(size: usize) -> u64 {
    let layout = match Layout::from_size_align(size, STACK_ALIGN) {
        Ok(layout) => layout,
        Err(_) => crate::exit::fatal("bad stack layout"),
    };
    // Safety: `layout` has a non-zero size.
    let base = unsafe { alloc(layout) };
    if base.is_null() {
        handle_alloc_error(layout);
    }
    base as u64
}

/// The machine's descriptor table.
pub static CPUS: CpuTable = CpuTable::new();

static MULTITHREADED: AtomicBool = AtomicBool::new(false);

/// Returns whether more than one CPU may be executing kernel code.
pub fn multithreaded() -> bool {
    MULTITHREADED.load(Ordering::Acquire)
}

/// Prepare the descriptor for a secondary CPU about to be started by
/// firmware, switching locks to their atomic path first.
pub fn prepare_secondary(server_no: u32, entry: fn(u64)) -> Option<usize> {
    MULTITHREADED.store(true, Ordering::Release);
    CPUS.bring_up_secondary(server_no, entry as usize as u64)
}

/// Body run by a secondary CPU once its start code has loaded its stack.
pub fn secondary_main<P: Processor>(cpu: &P, index: usize, entry: fn(u64)) {
    cpu.set_scratch(index);
    let Some(desc) = CPUS.get(index) else {
        crate::exit::fatal("secondary CPU started without a descriptor");
    };
    CPUS.cpu_online();
    entry(desc.server_no());
    CPUS.cpu_offline();
}

/// Wait up to the start timeout for `target` CPUs to be online.
pub fn wait_for_online<T: Timebase>(tb: &T, target: usize) -> bool {
    let timeout = CPU_START_TIMEOUT_SECS.saturating_mul(crate::time::tb_hz());
    CPUS.wait_for_online(tb, target, timeout)
}

/// Wait for every secondary to go offline and return to single-context
/// locking.
pub fn stop_secondaries<T: Timebase>(tb: &T) {
    while CPUS.nr_online() > 1 {
        tb.relax();
    }
    CPUS.reset_secondaries();
    MULTITHREADED.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockProcessor, MockTimebase};

    #[test]
    fn test_fresh_table_is_sentinel() {
        let table = CpuTable::new();
        assert_eq!(table.nr_started(), 0);
        assert!(table.get(0).is_none());
        assert_eq!(table.cpus[NR_CPUS - 1].stack(), ABSENT);
    }

    #[test]
    fn test_boot_cpu_descriptor() {
        let cpu = MockProcessor::new(0x004e_1200);
        cpu.set_scratch(99);
        let table = CpuTable::new();

        let desc = table.init_boot_cpu(&cpu, 4, 0x20_0000);
        assert_eq!(desc.server_no(), 4);
        assert_eq!(desc.exception_stack(), 0x20_0000 + 0x1_0000 - 64);
        assert_eq!(cpu.scratch(), 0);
        assert_eq!(table.nr_started(), 1);
        assert_eq!(table.nr_online(), 1);

        let current = table.current(&cpu).unwrap();
        assert_eq!(current.server_no(), 4);
    }

    #[test]
    fn test_secondary_gets_distinct_aligned_stacks() {
        let cpu = MockProcessor::new(0x004e_1200);
        let table = CpuTable::new();
        table.init_boot_cpu(&cpu, 0, 0x20_0000);

        let first = table.bring_up_secondary(1, 0x4000).unwrap();
        let second = table.bring_up_secondary(2, 0x4000).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.nr_started(), 3);

        let a = table.get(first).unwrap();
        let b = table.get(second).unwrap();
        assert_eq!(a.server_no(), 1);
        assert_eq!(a.entry(), 0x4000);
        assert_ne!(a.stack(), b.stack());
        assert_ne!(a.stack(), a.exception_stack());

        let base = a.stack() + STACK_RED_ZONE as u64 - STACK_SIZE as u64;
        assert_eq!(base % STACK_ALIGN as u64, 0);
    }

    #[test]
    fn test_current_uses_scratch_index() {
        let cpu = MockProcessor::new(0x004e_1200);
        let table = CpuTable::new();
        table.init_boot_cpu(&cpu, 0, 0x20_0000);
        let index = table.bring_up_secondary(9, 0).unwrap();

        cpu.set_scratch(index);
        assert_eq!(table.current(&cpu).unwrap().server_no(), 9);

        cpu.set_scratch(index + 1);
        assert!(table.current(&cpu).is_none());
    }

    #[test]
    fn test_wait_for_online_times_out() {
        let table = CpuTable::new();
        table.init_boot_cpu(&MockProcessor::new(0x004e_1200), 0, 0x20_0000);
        let tb = MockTimebase::new(10);

        assert!(!table.wait_for_online(&tb, 2, 1_000));
        assert!(tb.now() > 1_000);

        table.cpu_online();
        assert!(table.wait_for_online(&tb, 2, 1_000));
        table.cpu_offline();
        assert_eq!(table.nr_online(), 1);
    }

    #[test]
    fn test_reset_secondaries_keeps_boot_cpu() {
        let cpu = MockProcessor::new(0x004e_1200);
        let table = CpuTable::new();
        table.init_boot_cpu(&cpu, 7, 0x20_0000);
        table.bring_up_secondary(8, 0).unwrap();

        table.reset_secondaries();
        assert_eq!(table.nr_started(), 1);
        assert_eq!(table.get(0).unwrap().server_no(), 7);
        assert!(table.get(1).is_none());
    }
}
