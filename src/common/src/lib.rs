//! Data types shared between the Perch kernel and its test programs.

#![no_std]

pub mod error;
pub mod features;
pub mod region;

pub use error::{BringupError, TrapError, WaitError};
pub use features::FeatureFlags;
pub use region::{MemoryRegion, RegionFlags};
