//! System-wide error types for Perch.

use core::fmt;

/// Machine bring-up error types.
///
/// Every variant is a configuration error: continuing with an inconsistent
/// machine model is unsafe, so the boot path aborts on all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupError {
    /// The hardware description blob has a bad magic number or version
    InvalidBlob,
    /// Required node not found in the device tree
    MissingNode(&'static str),
    /// Required property not found in a node
    MissingProperty(&'static str),
    /// Property data is malformed
    InvalidProperty(&'static str),
    /// The device tree describes no memory
    NoMemory,
    /// No memory region contains the first free byte
    NoPrimaryRegion {
        /// The free-memory cursor that was looked up
        freemem: u64,
    },
}

impl fmt::Display for BringupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BringupError::InvalidBlob => write!(f, "invalid device tree blob"),
            BringupError::MissingNode(node) => write!(f, "device tree node {} not found", node),
            BringupError::MissingProperty(prop) => {
                write!(f, "device tree property {} not found", prop)
            }
            BringupError::InvalidProperty(prop) => {
                write!(f, "device tree property {} is malformed", prop)
            }
            BringupError::NoMemory => write!(f, "no memory regions described"),
            BringupError::NoPrimaryRegion { freemem } => {
                write!(f, "no memory region contains free memory start {:#x}", freemem)
            }
        }
    }
}

/// Trap table configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapError {
    /// Vector is not a multiple of 0x20 below 0x1000
    MisalignedVector(u32),
    /// A handler is already installed on the vector
    AlreadyInstalled(u32),
}

impl fmt::Display for TrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapError::MisalignedVector(vector) => {
                write!(f, "invalid exception vector {:#x}", vector)
            }
            TrapError::AlreadyInstalled(vector) => {
                write!(f, "exception handler installed twice {:#x}", vector)
            }
        }
    }
}

/// Cooperative wait errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The cede hypercall returned a failure status
    CedeFailed(i64),
    /// The cede returned without the decrementer firing
    UnexpectedWakeup,
    /// The decrementer vector was already claimed by another handler
    Trap(TrapError),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::CedeFailed(status) => write!(f, "H_CEDE failed ({})", status),
            WaitError::UnexpectedWakeup => write!(f, "H_CEDE returned without a decrementer interrupt"),
            WaitError::Trap(err) => write!(f, "{}", err),
        }
    }
}

impl From<TrapError> for WaitError {
    fn from(err: TrapError) -> Self {
        WaitError::Trap(err)
    }
}
