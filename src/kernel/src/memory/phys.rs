//! Early physical memory allocator.
//!
//! Hands out memory upward from the first free byte of the PRIMARY region.
//! Nothing is ever freed.

/// Bump allocator over a single physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysAllocator {
    cursor: u64,
    limit: u64,
    align: u64,
}

/// Range and alignment handed to the next allocator layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub start: u64,
    pub size: u64,
    pub align: u64,
}

const fn align_up(addr: u64, align: u64) -> Option<u64> {
    match addr.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}

impl PhysAllocator {
    /// An allocator with nothing to give.
    pub const fn empty() -> Self {
        Self {
            cursor: 0,
            limit: 0,
            align: 1,
        }
    }

    /// Manage `[start, limit)`.
    pub fn new(start: u64, limit: u64) -> Self {
        Self {
            cursor: start,
            limit: limit.max(start),
            align: 1,
        }
    }

    /// Raise the minimum alignment of every allocation.
    ///
    /// A zero alignment is ignored; non-powers of two are rounded up.
    pub fn set_minimum_alignment(&mut self, align: u64) {
        if align == 0 {
            return;
        }
        self.align = self.align.max(align.next_power_of_two());
    }

    /// Allocate `size` bytes aligned to at least `align`.
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        let align = self.align.max(align.max(1).next_power_of_two());
        let addr = align_up(self.cursor, align)?;
        let end = addr.checked_add(size)?;
        if end > self.limit {
            return None;
        }
        self.cursor = end;
        Some(addr)
    }

    /// First unallocated byte.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// One past the last managed byte.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn alignment(&self) -> u64 {
        self.align
    }

    /// Bytes left between the cursor and the limit.
    pub fn remaining(&self) -> u64 {
        self.limit - self.cursor
    }

    /// The unallocated range and minimum alignment.
    pub fn handoff(&self) -> Handoff {
        Handoff {
            start: self.cursor,
            size: self.remaining(),
            align: self.align,
        }
    }
}
