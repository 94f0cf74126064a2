//! Test infrastructure for the Perch kernel.
//!
//! On the guest, test binaries in `tests/` use the runner and panic handler
//! here and report through the exit protocol. On the development host, the
//! mocks stand in for the processor so the bring-up logic can be unit
//! tested.
//!
//! # Usage
//!
//! ```rust,ignore
//! use perch_kernel::testutil::{test_runner, Testable};
//! ```

use crate::println;

/// Exit codes reported by test binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TestExitCode {
    /// All tests passed.
    Success = 0,
    /// One or more tests failed.
    Failed = 1,
}

/// Trait for types that can be run as tests.
pub trait Testable {
    /// Run the test and report results.
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        println!("test {} ... ", core::any::type_name::<T>());
        self();
        println!("[ok]");
    }
}

/// Custom test runner for guest tests.
///
/// Runs all tests and exits with success if all pass.
///
/// # Example
///
/// ```rust,ignore
/// #![feature(custom_test_frameworks)]
/// #![test_runner(perch_kernel::testutil::test_runner)]
/// ```
pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    crate::exit::exit(TestExitCode::Success as i32);
}

/// Panic handler for guest test binaries.
///
/// Reports test failure and exits with the failure code.
pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    println!("[failed]");
    println!("Error: {}", info);
    crate::exit::exit(TestExitCode::Failed as i32)
}

#[cfg(test)]
pub use mock::{MockProcessor, MockTimebase};
