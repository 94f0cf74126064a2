//! Processor feature derivation.
//!
//! Features are computed once from the processor version and the
//! hypervisor bit, then published for test programs to query.

use perch_common::FeatureFlags;
use perch_hal::Processor;
use spin::Once;

/// Processor version values (upper half of PVR).
pub mod pvr {
    pub const PPC970: u32 = 0x0039;
    pub const PPC970FX: u32 = 0x003c;
    pub const PPC970MP: u32 = 0x0044;
    pub const POWER8E: u32 = 0x004b;
    pub const POWER8NVL: u32 = 0x004c;
    pub const POWER8: u32 = 0x004d;
    pub const POWER9: u32 = 0x004e;
    pub const POWER10: u32 = 0x0080;
}

/// Flags granted to every processor whose version appears in `versions`.
pub struct FeatureRule {
    pub name: &'static str,
    pub versions: &'static [u32],
    pub flags: FeatureFlags,
}

/// Version rules, applied in order and merged by union.
pub const FEATURE_RULES: &[FeatureRule] = &[
    FeatureRule {
        name: "PPC970",
        versions: &[pvr::PPC970, pvr::PPC970FX, pvr::PPC970MP],
        flags: FeatureFlags::empty(),
    },
    FeatureRule {
        name: "POWER8 or later",
        versions: &[
            pvr::POWER8E,
            pvr::POWER8NVL,
            pvr::POWER8,
            pvr::POWER9,
            pvr::POWER10,
        ],
        flags: FeatureFlags::POWER_MCE
            .union(FeatureFlags::SIAR)
            .union(FeatureFlags::HEAI),
    },
    FeatureRule {
        name: "POWER10",
        versions: &[pvr::POWER10],
        flags: FeatureFlags::PREFIX
            .union(FeatureFlags::SC_LEV)
            .union(FeatureFlags::PAUSE_SHORT),
    },
];

/// Returns whether any rule covers the version in `pvr_value`.
pub fn is_known(pvr_value: u32) -> bool {
    let version = pvr_value >> 16;
    FEATURE_RULES.iter().any(|rule| rule.versions.contains(&version))
}

/// Features for a processor version register value.
///
/// Unknown versions get the empty set and a warning. The emulation
/// assistance feature depends on a hypervisor-only register, so it is
/// dropped when not running with hypervisor privilege.
pub fn derive(pvr_value: u32, hypervisor: bool) -> FeatureFlags {
    let version = pvr_value >> 16;
    let mut flags = FeatureFlags::empty();

    for rule in FEATURE_RULES.iter().filter(|rule| rule.versions.contains(&version)) {
        flags |= rule.flags;
    }

    if !is_known(pvr_value) {
        log::warn!("unknown processor version {:#06x}, assuming no features", version);
    }

    if hypervisor {
        flags |= FeatureFlags::HV;
    } else {
        flags.remove(FeatureFlags::HEAI);
    }
    flags
}

/// Features of the calling processor.
pub fn detect<P: Processor>(cpu: &P) -> FeatureFlags {
    derive(cpu.version(), cpu.hypervisor_mode())
}

static FEATURES: Once<FeatureFlags> = Once::new();

/// Publish the machine's features. Later calls are ignored.
pub fn publish(flags: FeatureFlags) -> FeatureFlags {
    *FEATURES.call_once(|| flags)
}

/// The published features, or the empty set before bring-up.
pub fn get() -> FeatureFlags {
    FEATURES.get().copied().unwrap_or(FeatureFlags::empty())
}

/// Returns whether the running machine is a PAPR guest.
pub fn machine_is_pseries() -> bool {
    get().is_pseries()
}

/// Returns whether the running machine is bare OPAL firmware.
pub fn machine_is_powernv() -> bool {
    get().is_powernv()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockProcessor;

    #[test]
    fn test_power9_guest() {
        let flags = derive(0x004e_1202, false);
        assert_eq!(flags, FeatureFlags::POWER_MCE | FeatureFlags::SIAR);
        assert!(flags.is_pseries());
    }

    #[test]
    fn test_power9_hypervisor_keeps_heai() {
        let flags = derive(0x004e_1202, true);
        assert_eq!(
            flags,
            FeatureFlags::HV | FeatureFlags::POWER_MCE | FeatureFlags::SIAR | FeatureFlags::HEAI
        );
        assert!(flags.is_powernv());
    }

    #[test]
    fn test_power10_merges_both_rules() {
        let flags = derive(0x0080_0200, true);
        assert!(flags.contains(FeatureFlags::POWER_MCE | FeatureFlags::HEAI));
        assert!(flags.contains(
            FeatureFlags::PREFIX | FeatureFlags::SC_LEV | FeatureFlags::PAUSE_SHORT
        ));
    }

    #[test]
    fn test_power8_variants() {
        for version in [pvr::POWER8E, pvr::POWER8NVL, pvr::POWER8] {
            let flags = derive(version << 16, false);
            assert!(flags.contains(FeatureFlags::POWER_MCE));
            assert!(!flags.contains(FeatureFlags::PREFIX));
        }
    }

    #[test]
    fn test_ppc970_has_no_features() {
        assert_eq!(derive(pvr::PPC970FX << 16, false), FeatureFlags::empty());
    }

    #[test]
    fn test_unknown_version_is_minimal() {
        assert_eq!(derive(0x1234_0000, false), FeatureFlags::empty());
        assert_eq!(derive(0x1234_0000, true), FeatureFlags::HV);
        assert!(!is_known(0x1234_0000));
        assert!(is_known(pvr::PPC970 << 16));
    }

    #[test]
    fn test_detect_reads_processor() {
        let cpu = MockProcessor::hypervisor(pvr::POWER9 << 16);
        assert!(detect(&cpu).contains(FeatureFlags::HV | FeatureFlags::HEAI));
    }
}
