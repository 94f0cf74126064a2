//! Perch Kernel
//!
//! Machine bring-up and trap-dispatch core of a bare-metal test kernel for
//! 64-bit POWER guests.
//!
//! # Architecture
//!
//! The kernel is structured into the following modules:
//! - `boot`: the bring-up sequence and boot logging
//! - `devicetree`, `topology`, `features`: hardware discovery
//! - `memory`, `allocator`: region map, early allocator and heap
//! - `trap`, `stack`: exception dispatch and fault-time backtraces
//! - `smp`, `sync`, `time`: per-CPU state, spinlocks and waits
//! - `arch`: register access and hypervisor calls
//!
//! # Safety
//!
//! This is a `#![no_std]` kernel. All unsafe code is documented with safety
//! invariants explaining why the usage is correct.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "powerpc64", feature(asm_experimental_arch))]

extern crate alloc;

pub mod allocator;
pub mod arch;
pub mod boot;
pub mod config;
pub mod console;
pub mod devicetree;
pub mod exit;
pub mod features;
pub mod logger;
pub mod memory;
pub mod smp;
pub mod stack;
pub mod sync;
pub mod testutil;
pub mod time;
pub mod topology;
pub mod trap;
