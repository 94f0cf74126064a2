//! Perch Hardware Abstraction Layer (HAL) traits.
//!
//! This crate defines the traits the bring-up core uses to reach the
//! processor, so the core can be exercised on a development host with mock
//! hardware and on a POWER guest with the real registers.

#![no_std]

/// Trait for a serial port or similar character-based communication channel.
pub trait Serial {
    /// Writes a single byte to the serial port.
    fn write_byte(&mut self, byte: u8);
    /// Reads a single byte from the serial port, if available.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Trait for controlling external interrupt delivery on the calling CPU.
pub trait LocalInterrupts {
    /// Enables external interrupts (`MSR[EE]` on POWER).
    fn enable(&self);
    /// Disables external interrupts.
    fn disable(&self);
    /// Returns whether external interrupts are currently enabled.
    fn are_enabled(&self) -> bool;
}

/// Processor identification and per-CPU state.
pub trait Processor {
    /// Reads the 32-bit processor version register.
    fn version(&self) -> u32;
    /// Returns whether the running context holds hypervisor privilege.
    fn hypervisor_mode(&self) -> bool;
    /// Reads the per-CPU scratch register.
    fn scratch(&self) -> usize;
    /// Writes the per-CPU scratch register.
    fn set_scratch(&self, value: usize);
}

/// The free-running cycle counter and the decrementer.
pub trait Timebase {
    /// Largest value the decrementer can be programmed with without
    /// firing immediately.
    const DECREMENTER_MAX: u64;

    /// Reads the timebase.
    fn read_timebase(&self) -> u64;
    /// Programs the decrementer to fire after `ticks` timebase cycles.
    fn set_decrementer(&self, ticks: u64);
    /// Hints the execution unit that the caller is spinning.
    fn relax(&self);
}

/// Status word returned by a failed hypervisor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HcallError(pub i64);

/// Calls into the hypervisor that the bring-up core depends on.
pub trait Hypervisor {
    /// Returns whether the platform offers a cooperative yield.
    fn can_cede(&self) -> bool;

    /// Yields the calling CPU to the hypervisor until an interrupt is
    /// pending.
    ///
    /// Must be entered with external interrupts disabled; the call enables
    /// them atomically when the CPU is suspended and returns once the
    /// pending interrupt has been delivered.
    fn cede(&self) -> Result<(), HcallError>;
}
