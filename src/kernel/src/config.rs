//! Compile-time machine configuration.

use log::LevelFilter;

/// Maximum number of hardware threads tracked.
pub const NR_CPUS: usize = 256;

/// Maximum number of memory regions taken from the device tree.
pub const NR_MEM_REGIONS: usize = 8;

/// Page size used to align the free-memory cursor.
pub const PAGE_SIZE: u64 = 0x1_0000;

/// Size of each per-CPU stack.
pub const STACK_SIZE: usize = 0x1_0000;

/// Size of each per-CPU exception stack.
pub const EXCEPTION_STACK_SIZE: usize = 0x1_0000;

/// Alignment of dynamically allocated stacks.
pub const STACK_ALIGN: usize = 0x1000;

/// Bytes reserved at the top of every stack for the first frame's
/// back chain and LR save area.
pub const STACK_RED_ZONE: usize = 64;

/// Upper bound for the kernel heap carved from the PRIMARY region.
pub const KERNEL_HEAP_SIZE: usize = 32 * 1024 * 1024;

/// Seconds to wait for a secondary CPU to come online.
pub const CPU_START_TIMEOUT_SECS: u64 = 3;

/// Maximum level passed to the logger.
#[cfg(not(feature = "verbose"))]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Maximum level passed to the logger.
#[cfg(feature = "verbose")]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
