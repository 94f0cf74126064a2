//! Bring-up sequence run by the boot CPU.

use perch_common::{BringupError, FeatureFlags};
use perch_hal::Processor;

use crate::devicetree::{FirmwareEntry, HardwareDescription};
use crate::features;
use crate::memory::{self, PhysAllocator, RegionMap};
use crate::topology::{self, CpuTopology};

/// What bring-up learned about the machine.
#[derive(Debug, Clone)]
pub struct Machine {
    pub topology: CpuTopology,
    pub features: FeatureFlags,
    pub regions: RegionMap,
    pub boot_cpu: u32,
}

/// Build the machine model from the hardware description.
///
/// CPU discovery runs before the allocator is seeded, since the
/// allocation alignment comes from the cache line sizes.
pub fn discover_machine<D, P>(
    dt: &D,
    cpu: &P,
    freemem: u64,
) -> Result<(Machine, PhysAllocator), BringupError>
where
    D: HardwareDescription + ?Sized,
    P: Processor,
{
    let topology = topology::discover(dt)?;
    let features = features::detect(cpu);
    let regions = RegionMap::discover(dt, freemem)?;
    let phys = memory::seed_allocator(&topology, &regions, freemem);

    let machine = Machine {
        topology,
        features,
        regions,
        boot_cpu: dt.boot_cpuid_phys(),
    };
    Ok((machine, phys))
}

/// Firmware interface behind the console and power-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// PAPR hypervisor calls.
    Papr,
    /// OPAL calls through the given entry.
    Opal(FirmwareEntry),
}

/// Pick the firmware interface for the platform `features` describe.
pub fn select_firmware<D>(dt: &D, features: FeatureFlags) -> Result<Firmware, BringupError>
where
    D: HardwareDescription + ?Sized,
{
    if features.is_powernv() {
        dt.opal().map(Firmware::Opal)
    } else {
        Ok(Firmware::Papr)
    }
}

#[cfg(target_arch = "powerpc64")]
pub use guest::setup;

#[cfg(target_arch = "powerpc64")]
mod guest {
    use alloc::format;
    use alloc::string::String;
    use core::slice;

    use perch_hal::{HcallError, Processor};

    use super::*;
    use crate::allocator;
    use crate::arch::powerpc64::{self, hcall, opal, serial, Ppc64, BOOT_EXCEPTION_STACK};
    use crate::boot::relocate::FreeMemory;
    use crate::boot::{self, Status, BOOTARGS, ENVIRONMENT, MACHINE};
    use crate::console;
    use crate::devicetree::{self, FdtDescription};
    use crate::exit::fatal;
    use crate::logger;
    use crate::smp::CPUS;
    use crate::time;

    /// Bring the machine up from the device tree at `fdt`.
    ///
    /// # Safety
    ///
    /// Must run once, on the boot CPU, with `fdt` pointing at the blob the
    /// loader passed in and nothing but the boot stack in use above
    /// `stacktop`.
    pub unsafe fn setup(fdt: *const u8) -> &'static Machine {
        let cpu = Ppc64;

        let header = devicetree::header_at(fdt).unwrap_or_else(|err| fatal(err));
        CPUS.reset();
        CPUS.init_boot_cpu(&cpu, header.boot_cpuid_phys, BOOT_EXCEPTION_STACK.base());
        powerpc64::enable_mcheck();

        // The console needs no memory of its own, only the platform. Nothing
        // can be printed if this fails.
        let features = features::publish(features::detect(&cpu));
        let early = slice::from_raw_parts(fdt, header.total_size as usize);
        let firmware = FdtDescription::new(early)
            .and_then(|dt| select_firmware(&dt, features))
            .unwrap_or_else(|err| fatal(err));
        match firmware {
            Firmware::Papr => console::install(serial::terminal()),
            Firmware::Opal(entry) => {
                opal::init(entry).unwrap_or_else(|err| fatal(err));
                console::install(opal::console());
            }
        }
        if !features::is_known(cpu.version()) {
            boot::log(
                Status::Warn,
                format_args!("unknown processor version {:#06x}", cpu.version() >> 16),
            );
        }

        let mut free = FreeMemory::new(powerpc64::stack_top());
        let total = header.total_size as usize;
        let blob = slice::from_raw_parts(free.relocate(fdt, total), total);
        let dt = FdtDescription::new(blob).unwrap_or_else(|err| fatal(err));
        let initrd = dt.initrd().map(|(start, end)| {
            let len = (end - start) as usize;
            (free.relocate(start as *const u8, len) as *const u8, len)
        });
        let freemem = free.page_aligned();

        let (machine, mut phys) =
            discover_machine(&dt, &cpu, freemem).unwrap_or_else(|err| fatal(err));
        time::set_tb_hz(machine.topology.tb_hz());

        if features.is_pseries() {
            if let Err(HcallError(status)) = hcall::set_interrupt_endianness() {
                fatal(format_args!("H_SET_MODE failed ({})", status));
            }
        }

        let heap = allocator::init_heap(&mut phys).unwrap_or_else(|err| fatal(err));
        *crate::memory::PHYS_ALLOCATOR.lock() = phys;
        logger::init();

        if let Some((start, len)) = initrd {
            ENVIRONMENT.call_once(|| slice::from_raw_parts(start, len).to_vec());
        }
        if let Some(args) = dt.bootargs() {
            BOOTARGS.call_once(|| String::from(args));
        }

        let machine = MACHINE.call_once(|| machine);
        boot::log(Status::Ok, "Machine brought up");
        boot::log_detail(&format!(
            "{} CPUs, timebase {} Hz, features {:?}",
            machine.topology.nr_present(),
            machine.topology.tb_hz(),
            machine.features
        ));
        boot::log_detail(&format!(
            "memory {:#x}-{:#x}, heap {:#x}+{:#x}",
            machine.regions.physical_start(),
            machine.regions.physical_end(),
            heap.start,
            heap.size
        ));
        log::debug!("free memory starts at {:#x}", freemem);
        machine
    }
}
