//! Kernel heap allocation.

use core::fmt;

use linked_list_allocator::LockedHeap;

use crate::config::KERNEL_HEAP_SIZE;
use crate::memory::PhysAllocator;

/// Smallest heap worth bringing up.
pub const MIN_HEAP_SIZE: u64 = 64 * 1024;

#[cfg_attr(all(target_arch = "powerpc64", not(test)), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Placement of the kernel heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRange {
    pub start: u64,
    pub size: u64,
}

/// Heap set-up failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapError {
    /// Bytes left in the early allocator.
    pub available: u64,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not enough memory for the kernel heap ({:#x} bytes free)", self.available)
    }
}

/// Carve the heap out of `phys`: at most `max` bytes, at least
/// [`MIN_HEAP_SIZE`].
pub fn carve_heap(phys: &mut PhysAllocator, max: u64) -> Result<HeapRange, HeapError> {
    let available = phys.remaining();
    let size = max.min(available.saturating_sub(phys.alignment())) & !(phys.alignment() - 1);
    if size < MIN_HEAP_SIZE {
        return Err(HeapError { available });
    }
    let start = phys.alloc(size, 1).ok_or(HeapError { available })?;
    Ok(HeapRange { start, size })
}

/// Initialize the kernel heap from the early physical allocator.
///
/// # Safety
///
/// Must be called once, with `phys` describing memory that is identity
/// mapped and otherwise unused.
pub unsafe fn init_heap(phys: &mut PhysAllocator) -> Result<HeapRange, HeapError> {
    let heap = carve_heap(phys, KERNEL_HEAP_SIZE as u64)?;

    // SAFETY: the range was just taken from the early allocator, which never
    // hands out the same bytes twice, and the caller guarantees it is mapped.
    ALLOCATOR
        .lock()
        .init(heap.start as *mut u8, heap.size as usize);

    Ok(heap)
}
