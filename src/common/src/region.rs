use bitflags::bitflags;

bitflags! {
    /// Attributes of a physical memory region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionFlags: u32 {
        /// The region holding the initial free-memory cursor
        const PRIMARY = 1 << 0;
    }
}

/// A range of physical memory described by the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryRegion {
    /// First byte of the region.
    pub start: u64,
    /// One past the last byte of the region.
    pub end: u64,
    /// Region attributes.
    pub flags: RegionFlags,
}

impl MemoryRegion {
    /// Create an untagged region covering `[start, end)`.
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            flags: RegionFlags::empty(),
        }
    }

    /// Returns whether `addr` lies inside the region.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Returns whether this is the PRIMARY region.
    pub fn is_primary(&self) -> bool {
        self.flags.contains(RegionFlags::PRIMARY)
    }
}
