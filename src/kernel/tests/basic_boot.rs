#![cfg(target_arch = "powerpc64")]
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(perch_kernel::testutil::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use perch_hal::Timebase;
use perch_kernel::arch::powerpc64::Ppc64;
use perch_kernel::testutil::TestExitCode;
use perch_kernel::trap::{self, vector, TrapFrame};
use perch_kernel::{boot, exit, features, smp};

#[no_mangle]
pub extern "C" fn perch_main(fdt: *const u8) -> ! {
    // SAFETY: entered once from the boot stub with the loader's blob.
    unsafe { boot::setup(fdt) };
    test_main();
    exit::exit(TestExitCode::Success as i32)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    perch_kernel::testutil::test_panic_handler(info)
}

#[test_case]
fn boot_cpu_is_described() {
    let machine = boot::machine().unwrap();
    let boot_cpu = smp::CPUS.current(&Ppc64).unwrap();
    assert_eq!(boot_cpu.server_no(), u64::from(machine.boot_cpu));
    assert!(machine.topology.hwids().contains(&machine.boot_cpu));
}

#[test_case]
fn platform_is_exclusive() {
    assert_ne!(features::machine_is_pseries(), features::machine_is_powernv());
}

#[test_case]
fn decrementer_slot_is_free_after_sleep() {
    perch_kernel::time::usleep(100);
    assert!(!trap::TRAPS.is_installed(vector::DECREMENTER));
}

fn set_r3(frame: &mut TrapFrame, data: usize) {
    frame.gpr[3] = data as u64;
}

#[test_case]
fn handler_sees_its_data() {
    trap::handle_exception(vector::SYSTEM_CALL, Some(set_r3), 0x55);
    let mut frame = TrapFrame::for_vector(vector::SYSTEM_CALL);
    assert!(trap::TRAPS.invoke(&mut frame));
    assert_eq!(frame.gpr[3], 0x55);
    trap::handle_exception(vector::SYSTEM_CALL, None, 0);
}

#[test_case]
fn timebase_advances() {
    let start = Ppc64.read_timebase();
    perch_kernel::time::udelay(10);
    assert!(Ppc64.read_timebase() > start);
}
