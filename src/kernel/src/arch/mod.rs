//! Architecture-specific implementations.
//!
//! Currently supported: powerpc64 (PAPR guests and OPAL hosts). Other
//! targets only build the portable core for host-side unit tests.

#[cfg(target_arch = "powerpc64")]
pub mod powerpc64;

#[cfg(target_arch = "powerpc64")]
pub use powerpc64::{halt, power_off};

/// Stops the machine. Hosts have nothing to stop, so the caller just spins.
#[cfg(not(target_arch = "powerpc64"))]
pub fn halt(_code: i32) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_arch = "powerpc64"))]
pub use halt as power_off;
