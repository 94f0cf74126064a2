//! Hardware description access.
//!
//! Bring-up reads the machine description through [`HardwareDescription`]
//! so discovery can be driven by a real flattened device tree on the guest
//! and by a table of nodes in host tests.

use fdt::Fdt;
use perch_common::BringupError;

/// Magic number at offset 0 of a flattened device tree.
pub const FDT_MAGIC: u32 = 0xd00d_feed;

/// Size of the fixed header fields this crate reads.
pub const HEADER_SIZE: usize = 40;

const OFF_MAGIC: usize = 0x00;
const OFF_TOTAL_SIZE: usize = 0x04;
const OFF_BOOT_CPUID: usize = 0x1c;

/// Property listing the hardware threads of a CPU core.
pub const PROP_SERVERS: &str = "ibm,ppc-interrupt-server#s";
pub const PROP_ICACHE_LINE: &str = "i-cache-line-size";
pub const PROP_DCACHE_LINE: &str = "d-cache-line-size";
pub const PROP_TIMEBASE: &str = "timebase-frequency";

/// Node describing OPAL firmware on bare-metal machines.
pub const OPAL_NODE: &str = "/ibm,opal";
pub const PROP_OPAL_BASE: &str = "opal-base-address";
pub const PROP_OPAL_ENTRY: &str = "opal-entry-address";

/// Fields of the device tree header needed before the blob is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Size of the whole blob in bytes.
    pub total_size: u32,
    /// Hardware id of the CPU that booted.
    pub boot_cpuid_phys: u32,
}

fn be32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes(word.try_into().ok()?))
}

/// Read the header at the start of `blob`.
pub fn read_header(blob: &[u8]) -> Result<BlobHeader, BringupError> {
    if blob.len() < HEADER_SIZE || be32_at(blob, OFF_MAGIC) != Some(FDT_MAGIC) {
        return Err(BringupError::InvalidBlob);
    }
    let total_size = be32_at(blob, OFF_TOTAL_SIZE).ok_or(BringupError::InvalidBlob)?;
    let boot_cpuid_phys = be32_at(blob, OFF_BOOT_CPUID).ok_or(BringupError::InvalidBlob)?;
    if (total_size as usize) < HEADER_SIZE {
        return Err(BringupError::InvalidBlob);
    }
    Ok(BlobHeader {
        total_size,
        boot_cpuid_phys,
    })
}

/// Read the header of the blob at `ptr`.
///
/// # Safety
///
/// `ptr` must be readable for [`HEADER_SIZE`] bytes.
pub unsafe fn header_at(ptr: *const u8) -> Result<BlobHeader, BringupError> {
    read_header(core::slice::from_raw_parts(ptr, HEADER_SIZE))
}

/// Decode a one- or two-cell big-endian integer property.
pub fn read_cells(value: &[u8]) -> Option<u64> {
    match value.len() {
        4 => be32_at(value, 0).map(u64::from),
        8 => Some(u64::from_be_bytes(value.try_into().ok()?)),
        _ => None,
    }
}

/// Decode a required integer property.
pub fn cell_property(value: Option<&[u8]>, name: &'static str) -> Result<u64, BringupError> {
    let value = value.ok_or(BringupError::MissingProperty(name))?;
    read_cells(value).ok_or(BringupError::InvalidProperty(name))
}

/// Where OPAL firmware lives and how to call it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareEntry {
    /// Value OPAL expects in r2.
    pub base: u64,
    /// Address calls branch to.
    pub entry: u64,
}

impl FirmwareEntry {
    /// Decode the two address properties of the OPAL node.
    pub fn from_properties(
        base: Option<&[u8]>,
        entry: Option<&[u8]>,
    ) -> Result<Self, BringupError> {
        Ok(Self {
            base: cell_property(base, PROP_OPAL_BASE)?,
            entry: cell_property(entry, PROP_OPAL_ENTRY)?,
        })
    }
}

/// One `cpu` node as seen by discovery.
#[derive(Debug, Clone, Copy)]
pub struct CpuNode<'a> {
    pub name: &'a str,
    /// Raw big-endian cells of the interrupt-server property.
    pub servers: Option<&'a [u8]>,
    pub icache_line_size: Option<&'a [u8]>,
    pub dcache_line_size: Option<&'a [u8]>,
    pub timebase_frequency: Option<&'a [u8]>,
}

impl<'a> CpuNode<'a> {
    /// Hardware thread ids listed by the node.
    pub fn thread_ids(&self) -> impl Iterator<Item = u32> + 'a {
        self.servers
            .unwrap_or(&[])
            .chunks_exact(4)
            .map(|cell| u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]))
    }
}

/// A `reg` entry of a memory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySpan {
    pub base: u64,
    pub size: u64,
}

/// Read-only view of the machine description.
pub trait HardwareDescription {
    /// Visit every node under `/cpus` whose device type is `cpu`, stopping
    /// at the first error the visitor returns.
    fn for_each_cpu_node(
        &self,
        visit: &mut dyn FnMut(&CpuNode<'_>) -> Result<(), BringupError>,
    ) -> Result<(), BringupError>;

    /// Fill `out` with memory spans and return how many were written.
    fn memory_spans(&self, out: &mut [MemorySpan]) -> usize;

    /// `[start, end)` of the initial ramdisk, if the loader provided one.
    fn initrd(&self) -> Option<(u64, u64)>;

    /// The kernel command line, if present.
    fn bootargs(&self) -> Option<&str>;

    /// Hardware id of the boot CPU.
    fn boot_cpuid_phys(&self) -> u32;

    /// OPAL base and entry addresses.
    fn opal(&self) -> Result<FirmwareEntry, BringupError>;
}

/// [`HardwareDescription`] backed by a flattened device tree.
pub struct FdtDescription<'a> {
    fdt: Fdt<'a>,
    header: BlobHeader,
}

impl<'a> FdtDescription<'a> {
    /// Parse `blob`.
    pub fn new(blob: &'a [u8]) -> Result<Self, BringupError> {
        let header = read_header(blob)?;
        let fdt = Fdt::new(blob).map_err(|_| BringupError::InvalidBlob)?;
        Ok(Self { fdt, header })
    }

    /// The parsed header.
    pub fn header(&self) -> BlobHeader {
        self.header
    }
}

impl HardwareDescription for FdtDescription<'_> {
    fn for_each_cpu_node(
        &self,
        visit: &mut dyn FnMut(&CpuNode<'_>) -> Result<(), BringupError>,
    ) -> Result<(), BringupError> {
        let cpus = self
            .fdt
            .find_node("/cpus")
            .ok_or(BringupError::MissingNode("/cpus"))?;

        for node in cpus.children() {
            let device_type = node.property("device_type").and_then(|p| p.as_str());
            if device_type != Some("cpu") {
                continue;
            }
            let cpu = CpuNode {
                name: node.name,
                servers: node.property(PROP_SERVERS).map(|p| p.value),
                icache_line_size: node.property(PROP_ICACHE_LINE).map(|p| p.value),
                dcache_line_size: node.property(PROP_DCACHE_LINE).map(|p| p.value),
                timebase_frequency: node.property(PROP_TIMEBASE).map(|p| p.value),
            };
            visit(&cpu)?;
        }
        Ok(())
    }

    fn memory_spans(&self, out: &mut [MemorySpan]) -> usize {
        let mut count = 0;
        let memory_nodes = self.fdt.all_nodes().filter(|node| {
            node.name.starts_with("memory")
                || node.property("device_type").and_then(|p| p.as_str()) == Some("memory")
        });

        for node in memory_nodes {
            for reg in node.reg().into_iter().flatten() {
                if count == out.len() {
                    log::warn!("more memory regions than {}, ignoring the rest", out.len());
                    return count;
                }
                out[count] = MemorySpan {
                    base: reg.starting_address as u64,
                    size: reg.size.unwrap_or(0) as u64,
                };
                count += 1;
            }
        }
        count
    }

    fn initrd(&self) -> Option<(u64, u64)> {
        let chosen = self.fdt.find_node("/chosen")?;
        let start = read_cells(chosen.property("linux,initrd-start")?.value)?;
        let end = read_cells(chosen.property("linux,initrd-end")?.value)?;
        (end > start).then_some((start, end))
    }

    fn bootargs(&self) -> Option<&str> {
        self.fdt
            .find_node("/chosen")?
            .property("bootargs")
            .and_then(|p| p.as_str())
    }

    fn boot_cpuid_phys(&self) -> u32 {
        self.header.boot_cpuid_phys
    }

    fn opal(&self) -> Result<FirmwareEntry, BringupError> {
        let node = self
            .fdt
            .find_node(OPAL_NODE)
            .ok_or(BringupError::MissingNode(OPAL_NODE))?;
        FirmwareEntry::from_properties(
            node.property(PROP_OPAL_BASE).map(|p| p.value),
            node.property(PROP_OPAL_ENTRY).map(|p| p.value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(total_size: u32, boot_cpu: u32) -> [u8; HEADER_SIZE] {
        let mut blob = [0u8; HEADER_SIZE];
        blob[0..4].copy_from_slice(&FDT_MAGIC.to_be_bytes());
        blob[4..8].copy_from_slice(&total_size.to_be_bytes());
        blob[0x1c..0x20].copy_from_slice(&boot_cpu.to_be_bytes());
        blob
    }

    #[test]
    fn test_read_header() {
        let blob = header(0x1000, 3);
        assert_eq!(
            read_header(&blob),
            Ok(BlobHeader {
                total_size: 0x1000,
                boot_cpuid_phys: 3
            })
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut blob = header(0x1000, 0);
        blob[0] = 0;
        assert_eq!(read_header(&blob), Err(BringupError::InvalidBlob));
        assert_eq!(read_header(&blob[..8]), Err(BringupError::InvalidBlob));
    }

    #[test]
    fn test_read_cells() {
        assert_eq!(read_cells(&[0, 0, 0, 128]), Some(128));
        assert_eq!(read_cells(&[0, 0, 0, 1, 0, 0, 0, 0]), Some(1 << 32));
        assert_eq!(read_cells(&[1, 2, 3]), None);
    }

    #[test]
    fn test_opal_addresses() {
        let base = 0x3000_0000u64.to_be_bytes();
        let entry = 0x3000_2000u64.to_be_bytes();
        assert_eq!(
            FirmwareEntry::from_properties(Some(&base), Some(&entry)),
            Ok(FirmwareEntry {
                base: 0x3000_0000,
                entry: 0x3000_2000
            })
        );
        assert_eq!(
            FirmwareEntry::from_properties(Some(&base), None),
            Err(BringupError::MissingProperty(PROP_OPAL_ENTRY))
        );
        assert_eq!(
            FirmwareEntry::from_properties(Some(&[1, 2]), Some(&entry)),
            Err(BringupError::InvalidProperty(PROP_OPAL_BASE))
        );
    }

    #[test]
    fn test_thread_ids_decode_big_endian() {
        let servers = [0, 0, 0, 8, 0, 0, 0, 9, 0, 0];
        let node = CpuNode {
            name: "PowerPC,POWER9@8",
            servers: Some(&servers),
            icache_line_size: None,
            dcache_line_size: None,
            timebase_frequency: None,
        };
        let ids: alloc::vec::Vec<u32> = node.thread_ids().collect();
        assert_eq!(ids, [8, 9]);
    }
}
