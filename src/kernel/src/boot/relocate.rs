//! Moving boot-time blobs out of the loader's way.

use core::ptr;

use crate::config::PAGE_SIZE;

/// Cursor over the free memory following the boot stack.
///
/// Blobs are copied back to back, so the device tree has to be moved
/// before the initial environment: both offsets come from this cursor.
pub struct FreeMemory {
    cursor: usize,
}

impl FreeMemory {
    pub const fn new(start: usize) -> Self {
        Self { cursor: start }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Copy `len` bytes from `src` to the cursor and advance past them.
    ///
    /// # Safety
    ///
    /// `src` must be readable for `len` bytes and the destination range
    /// must be unused memory. The ranges may overlap.
    pub unsafe fn relocate(&mut self, src: *const u8, len: usize) -> *mut u8 {
        let dest = self.cursor as *mut u8;
        ptr::copy(src, dest, len);
        self.cursor += len;
        dest
    }

    /// The cursor rounded up to the next page boundary.
    pub fn page_aligned(&self) -> u64 {
        (self.cursor as u64 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }
}
