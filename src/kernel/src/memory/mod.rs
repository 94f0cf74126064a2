//! Physical memory map and early allocation.

mod phys;

pub use phys::{Handoff, PhysAllocator};

use perch_common::{BringupError, MemoryRegion, RegionFlags};
use spin::Mutex;

use crate::config::NR_MEM_REGIONS;
use crate::devicetree::{HardwareDescription, MemorySpan};
use crate::topology::CpuTopology;

/// Memory regions from the device tree plus the overall physical bounds.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: [MemoryRegion; NR_MEM_REGIONS],
    count: usize,
    primary: usize,
    physical_start: u64,
    physical_end: u64,
}

impl RegionMap {
    /// Build the map from raw spans and tag the region holding `freemem`.
    ///
    /// Exactly one region is tagged PRIMARY: the first one containing
    /// `freemem`.
    pub fn build(spans: &[MemorySpan], freemem: u64) -> Result<Self, BringupError> {
        if spans.is_empty() {
            return Err(BringupError::NoMemory);
        }

        let mut regions = [MemoryRegion::default(); NR_MEM_REGIONS];
        let count = spans.len().min(NR_MEM_REGIONS);
        let mut physical_start = u64::MAX;
        let mut physical_end = 0;
        let mut primary = None;

        for (index, (region, span)) in regions.iter_mut().zip(spans).enumerate() {
            *region = MemoryRegion::new(span.base, span.base.saturating_add(span.size));
            physical_start = physical_start.min(region.start);
            physical_end = physical_end.max(region.end);
            if primary.is_none() && region.contains(freemem) {
                region.flags |= RegionFlags::PRIMARY;
                primary = Some(index);
            }
        }

        let primary = primary.ok_or(BringupError::NoPrimaryRegion { freemem })?;
        Ok(Self {
            regions,
            count,
            primary,
            physical_start,
            physical_end,
        })
    }

    /// Read the memory spans from `dt` and build the map.
    pub fn discover<D: HardwareDescription + ?Sized>(
        dt: &D,
        freemem: u64,
    ) -> Result<Self, BringupError> {
        let mut spans = [MemorySpan::default(); NR_MEM_REGIONS];
        let count = dt.memory_spans(&mut spans);
        Self::build(&spans[..count], freemem)
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions[..self.count]
    }

    /// The region holding the first free byte.
    pub fn primary(&self) -> &MemoryRegion {
        &self.regions[self.primary]
    }

    /// Lowest start over all regions.
    pub fn physical_start(&self) -> u64 {
        self.physical_start
    }

    /// Highest end over all regions.
    pub fn physical_end(&self) -> u64 {
        self.physical_end
    }
}

/// Seed an allocator with `[freemem, primary.end)` aligned to the larger
/// cache line size.
///
/// Needs the topology for the alignment, so CPU discovery must run first.
pub fn seed_allocator(topology: &CpuTopology, map: &RegionMap, freemem: u64) -> PhysAllocator {
    let mut phys = PhysAllocator::new(freemem, map.primary().end);
    phys.set_minimum_alignment(topology.allocation_alignment());
    phys
}

/// Remaining early physical memory after bring-up.
pub static PHYS_ALLOCATOR: Mutex<PhysAllocator> = Mutex::new(PhysAllocator::empty());

/// Allocate physical memory from the early allocator.
pub fn alloc_phys(size: u64, align: u64) -> Option<u64> {
    PHYS_ALLOCATOR.lock().alloc(size, align)
}
