use bitflags::bitflags;

bitflags! {
    /// Processor capabilities derived once from the version register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FeatureFlags: u32 {
        /// Running with hypervisor privilege (MSR[HV])
        const HV          = 1 << 0;
        /// POWER-style machine check interrupts
        const POWER_MCE   = 1 << 1;
        /// Sampled instruction address register
        const SIAR        = 1 << 2;
        /// Hypervisor emulation assistance interrupt (HEIR is an HV register)
        const HEAI        = 1 << 3;
        /// Prefixed instructions
        const PREFIX      = 1 << 4;
        /// The sc interrupt reports LEV in SRR1
        const SC_LEV      = 1 << 5;
        /// pause_short instruction
        const PAUSE_SHORT = 1 << 6;
    }
}

impl FeatureFlags {
    /// Returns whether the kernel runs as a PAPR guest.
    pub fn is_pseries(&self) -> bool {
        !self.contains(FeatureFlags::HV)
    }

    /// Returns whether the kernel runs on bare OPAL firmware.
    pub fn is_powernv(&self) -> bool {
        self.contains(FeatureFlags::HV)
    }
}
