//! Perch Kernel Entry Point
//!
//! The boot stub sets up the boot stack and calls `perch_main` with the
//! device tree address the loader passed in r3.

#![cfg_attr(target_arch = "powerpc64", no_std)]
#![cfg_attr(target_arch = "powerpc64", no_main)]

#[cfg(target_arch = "powerpc64")]
extern crate alloc;

#[cfg(target_arch = "powerpc64")]
mod kernel {
    use core::panic::PanicInfo;

    use perch_kernel::boot::{self, Status};
    use perch_kernel::{exit, features, println};

    /// Kernel entry point.
    ///
    /// Brings the machine up, reports what was found and hands the run's
    /// result to the exit protocol.
    #[no_mangle]
    pub extern "C" fn perch_main(fdt: *const u8) -> ! {
        // SAFETY: called once by the boot stub on the boot CPU with the
        // loader's device tree pointer.
        let machine = unsafe { boot::setup(fdt) };

        let platform = if features::machine_is_pseries() {
            "pseries"
        } else {
            "powernv"
        };
        boot::log(Status::Info, &alloc::format!("Platform: {}", platform));
        boot::log_detail(&alloc::format!("boot CPU {}", machine.boot_cpu));
        if let Some(args) = boot::bootargs() {
            boot::log_detail(&alloc::format!("bootargs: {}", args));
        }

        #[cfg(feature = "test")]
        perch_kernel::tests::run_all();

        boot::log(Status::Ok, "Boot complete!");
        exit::exit(0)
    }

    /// Panic handler.
    ///
    /// Called when the kernel encounters an unrecoverable error.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        println!("KERNEL PANIC: {}", info);
        exit::abort()
    }
}

#[cfg(not(target_arch = "powerpc64"))]
fn main() {}
