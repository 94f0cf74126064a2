//! CPU topology discovery.

use perch_common::BringupError;

use crate::config::NR_CPUS;
use crate::devicetree::{
    cell_property, CpuNode, HardwareDescription, PROP_DCACHE_LINE, PROP_ICACHE_LINE, PROP_SERVERS,
    PROP_TIMEBASE,
};

/// Marks an unused slot in the hardware id table.
pub const NO_CPU: u32 = u32::MAX;

/// Hardware threads and timing parameters shared by all CPUs.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    hwids: [u32; NR_CPUS],
    nr_present: usize,
    icache_bytes: u32,
    dcache_bytes: u32,
    tb_hz: u64,
}

impl CpuTopology {
    fn empty() -> Self {
        Self {
            hwids: [NO_CPU; NR_CPUS],
            nr_present: 0,
            icache_bytes: 0,
            dcache_bytes: 0,
            tb_hz: 0,
        }
    }

    /// Hardware ids of the present threads, in discovery order.
    pub fn hwids(&self) -> &[u32] {
        &self.hwids[..self.nr_present]
    }

    pub fn nr_present(&self) -> usize {
        self.nr_present
    }

    pub fn icache_bytes(&self) -> u32 {
        self.icache_bytes
    }

    pub fn dcache_bytes(&self) -> u32 {
        self.dcache_bytes
    }

    /// Timebase frequency in Hz.
    pub fn tb_hz(&self) -> u64 {
        self.tb_hz
    }

    /// Minimum alignment for physical allocations: the larger cache line.
    pub fn allocation_alignment(&self) -> u64 {
        u64::from(self.icache_bytes.max(self.dcache_bytes))
    }

    fn record(
        &mut self,
        node: &CpuNode<'_>,
        first: bool,
        overflowed: &mut bool,
    ) -> Result<(), BringupError> {
        let servers = node
            .servers
            .ok_or(BringupError::MissingProperty(PROP_SERVERS))?;
        if servers.len() % 4 != 0 {
            return Err(BringupError::InvalidProperty(PROP_SERVERS));
        }

        for id in node.thread_ids() {
            if self.nr_present == NR_CPUS {
                if !*overflowed {
                    log::warn!("number of CPUs exceeds {}, ignoring the rest", NR_CPUS);
                    *overflowed = true;
                }
                break;
            }
            self.hwids[self.nr_present] = id;
            self.nr_present += 1;
        }

        if first {
            self.icache_bytes = cell_property(node.icache_line_size, PROP_ICACHE_LINE)? as u32;
            self.dcache_bytes = cell_property(node.dcache_line_size, PROP_DCACHE_LINE)? as u32;
            self.tb_hz = cell_property(node.timebase_frequency, PROP_TIMEBASE)?;
        }
        Ok(())
    }
}

/// Walk every CPU node and build the topology.
///
/// Cache line sizes and timebase frequency come from the first node
/// visited. Later nodes only contribute their hardware threads.
pub fn discover<D: HardwareDescription + ?Sized>(dt: &D) -> Result<CpuTopology, BringupError> {
    let mut topology = CpuTopology::empty();
    let mut overflowed = false;
    let mut nodes = 0usize;

    dt.for_each_cpu_node(&mut |node: &CpuNode<'_>| {
        nodes += 1;
        topology.record(node, nodes == 1, &mut overflowed)
    })?;

    if nodes == 0 {
        return Err(BringupError::MissingNode("cpu"));
    }
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake_dt::{FakeCpu, FakeDescription};

    #[test]
    fn test_discover_threads_and_timing() {
        let dt = FakeDescription::new()
            .cpu(FakeCpu::new(&[0, 1, 2, 3]))
            .cpu(FakeCpu::new(&[8, 9, 10, 11]));

        let topology = discover(&dt).unwrap();
        assert_eq!(topology.nr_present(), 8);
        assert_eq!(topology.hwids(), [0, 1, 2, 3, 8, 9, 10, 11]);
        assert_eq!(topology.icache_bytes(), 128);
        assert_eq!(topology.dcache_bytes(), 128);
        assert_eq!(topology.tb_hz(), 512_000_000);
        assert_eq!(topology.allocation_alignment(), 128);
    }

    #[test]
    fn test_first_node_supplies_timing() {
        let mut second = FakeCpu::new(&[4, 5]);
        second.timebase = Some(1u32.to_be_bytes().to_vec());
        second.dcache = Some(256u32.to_be_bytes().to_vec());
        let dt = FakeDescription::new()
            .cpu(FakeCpu::new(&[0, 1]))
            .cpu(second);

        let topology = discover(&dt).unwrap();
        assert_eq!(topology.hwids(), [0, 1, 4, 5]);
        assert_eq!(topology.tb_hz(), 512_000_000);
        assert_eq!(topology.dcache_bytes(), 128);
        assert_eq!(topology.allocation_alignment(), 128);
    }

    #[test]
    fn test_later_node_may_omit_timing() {
        let mut second = FakeCpu::new(&[8]);
        second.timebase = None;
        second.icache = None;
        second.dcache = None;
        let dt = FakeDescription::new()
            .cpu(FakeCpu::new(&[0]))
            .cpu(second);

        let topology = discover(&dt).unwrap();
        assert_eq!(topology.nr_present(), 2);
        assert_eq!(topology.tb_hz(), 512_000_000);
    }

    #[test]
    fn test_discover_caps_at_table_size() {
        let ids: alloc::vec::Vec<u32> = (0..NR_CPUS as u32 + 8).collect();
        let dt = FakeDescription::new().cpu(FakeCpu::new(&ids));

        let topology = discover(&dt).unwrap();
        assert_eq!(topology.nr_present(), NR_CPUS);
        assert_eq!(topology.hwids()[NR_CPUS - 1], NR_CPUS as u32 - 1);
    }

    #[test]
    fn test_missing_timebase_is_an_error() {
        let mut cpu = FakeCpu::new(&[0]);
        cpu.timebase = None;
        let dt = FakeDescription::new().cpu(cpu);

        assert_eq!(
            discover(&dt).unwrap_err(),
            BringupError::MissingProperty(PROP_TIMEBASE)
        );
    }

    #[test]
    fn test_missing_servers_is_an_error() {
        let mut cpu = FakeCpu::new(&[]);
        cpu.servers = None;
        let dt = FakeDescription::new().cpu(cpu);

        assert_eq!(
            discover(&dt).unwrap_err(),
            BringupError::MissingProperty(PROP_SERVERS)
        );
    }

    #[test]
    fn test_no_cpu_nodes() {
        let dt = FakeDescription::new();
        assert_eq!(discover(&dt).unwrap_err(), BringupError::MissingNode("cpu"));
    }

    #[test]
    fn test_mismatched_cache_lines_use_larger() {
        let mut cpu = FakeCpu::new(&[0]);
        cpu.icache = Some(64u32.to_be_bytes().to_vec());
        let dt = FakeDescription::new().cpu(cpu);

        let topology = discover(&dt).unwrap();
        assert_eq!(topology.allocation_alignment(), 128);
    }
}
