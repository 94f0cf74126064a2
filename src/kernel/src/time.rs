//! Busy-wait delays and cooperative sleeps.
//!
//! A sleep yields the CPU to the hypervisor with `H_CEDE` in decrementer
//! sized slices. Each slice arms a one-shot handler on the decrementer
//! vector so the wakeup can be told apart from a stray interrupt.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use perch_common::WaitError;
use perch_hal::{HcallError, Hypervisor, LocalInterrupts, Timebase};

use crate::trap::{msr, vector, TrapFrame, TrapTable};

static TB_HZ: AtomicU64 = AtomicU64::new(0);

/// Record the timebase frequency found during discovery.
pub fn set_tb_hz(hz: u64) {
    TB_HZ.store(hz, Ordering::Relaxed);
}

/// Timebase frequency in Hz, zero before discovery.
pub fn tb_hz() -> u64 {
    TB_HZ.load(Ordering::Relaxed)
}

/// Convert microseconds to timebase cycles at `hz`.
pub fn micros_to_cycles(us: u64, hz: u64) -> u64 {
    let cycles = u128::from(us) * u128::from(hz) / 1_000_000;
    u64::try_from(cycles).unwrap_or(u64::MAX)
}

/// Spin until `cycles` timebase cycles have elapsed.
pub fn delay<T: Timebase>(tb: &T, cycles: u64) {
    let start = tb.read_timebase();
    while tb.read_timebase().wrapping_sub(start) < cycles {
        tb.relax();
    }
}

struct DecrementerWake<'a, T: Timebase> {
    timebase: &'a T,
    delivered: AtomicBool,
}

/// One-shot decrementer handler.
///
/// Pushes the next decrementer interrupt as far out as possible and
/// returns to the interrupted context with external interrupts disabled so
/// the next cede is entered the same way.
fn decrementer_oneshot<T: Timebase>(frame: &mut TrapFrame, data: usize) {
    // SAFETY: `data` is the address of the `DecrementerWake` registered by
    // `cede_slice`, which keeps it alive until the handler is uninstalled.
    let wake = unsafe { &*(data as *const DecrementerWake<T>) };
    wake.timebase.set_decrementer(T::DECREMENTER_MAX);
    frame.msr &= !msr::EE;
    wake.delivered.store(true, Ordering::Release);
}

/// Cede once with the decrementer armed for `ticks`.
fn cede_slice<H>(hw: &H, traps: &TrapTable, ticks: u64) -> Result<(), WaitError>
where
    H: Timebase + Hypervisor,
{
    let wake = DecrementerWake {
        timebase: hw,
        delivered: AtomicBool::new(false),
    };

    hw.set_decrementer(ticks);
    traps.install(
        vector::DECREMENTER,
        Some(decrementer_oneshot::<H>),
        &wake as *const DecrementerWake<H> as usize,
    )?;
    let ceded = hw.cede();
    traps.install(vector::DECREMENTER, None, 0)?;

    ceded.map_err(|HcallError(status)| WaitError::CedeFailed(status))?;
    if !wake.delivered.load(Ordering::Acquire) {
        return Err(WaitError::UnexpectedWakeup);
    }
    Ok(())
}

/// Yield the CPU for at least `cycles` timebase cycles.
///
/// Falls back to [`delay`] when the platform cannot cede. External
/// interrupts are disabled for the duration and restored afterwards.
pub fn sleep_cycles<H>(hw: &H, traps: &TrapTable, cycles: u64) -> Result<(), WaitError>
where
    H: Timebase + Hypervisor + LocalInterrupts,
{
    if !hw.can_cede() {
        delay(hw, cycles);
        return Ok(());
    }

    let was_enabled = hw.are_enabled();
    hw.disable();

    let mut now = hw.read_timebase();
    let end = now.saturating_add(cycles);
    let mut result = Ok(());
    while end > now {
        let left = (end - now).min(H::DECREMENTER_MAX);
        if let Err(err) = cede_slice(hw, traps, left) {
            result = Err(err);
            break;
        }
        now = hw.read_timebase();
    }

    if was_enabled {
        hw.enable();
    }
    result
}

#[cfg(target_arch = "powerpc64")]
mod machine {
    use super::*;
    use crate::arch::powerpc64::Ppc64;
    use crate::exit::fatal;
    use crate::trap::TRAPS;

    /// Spin for `cycles` timebase cycles.
    pub fn delay_tb(cycles: u64) {
        delay(&Ppc64, cycles);
    }

    pub fn udelay(us: u64) {
        delay_tb(micros_to_cycles(us, tb_hz()));
    }

    pub fn mdelay(ms: u64) {
        udelay(ms.saturating_mul(1000));
    }

    /// Cede for `cycles` timebase cycles.
    pub fn sleep_tb(cycles: u64) {
        if let Err(err) = sleep_cycles(&Ppc64, &TRAPS, cycles) {
            fatal(err);
        }
    }

    pub fn usleep(us: u64) {
        sleep_tb(micros_to_cycles(us, tb_hz()));
    }

    pub fn msleep(ms: u64) {
        usleep(ms.saturating_mul(1000));
    }
}

#[cfg(target_arch = "powerpc64")]
pub use machine::{delay_tb, mdelay, msleep, sleep_tb, udelay, usleep};

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use core::cell::Cell;

    use crate::testutil::MockTimebase;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum CedeMode {
        Deliver,
        Spurious,
        Fail,
    }

    /// Guest whose cede fast-forwards the clock to the decrementer.
    struct Guest {
        traps: &'static TrapTable,
        now: Cell<u64>,
        decrementer: Cell<u64>,
        irqs: Cell<bool>,
        can_cede: bool,
        mode: CedeMode,
        cedes: Cell<u32>,
        granted: Cell<u64>,
        ee_after_handler: Cell<bool>,
    }

    impl Guest {
        fn new(mode: CedeMode) -> Self {
            Self {
                traps: Box::leak(Box::new(TrapTable::new())),
                now: Cell::new(1_000),
                decrementer: Cell::new(0),
                irqs: Cell::new(true),
                can_cede: true,
                mode,
                cedes: Cell::new(0),
                granted: Cell::new(0),
                ee_after_handler: Cell::new(true),
            }
        }
    }

    impl Timebase for Guest {
        const DECREMENTER_MAX: u64 = 0x7fff_ffff;

        fn read_timebase(&self) -> u64 {
            self.now.get()
        }

        fn set_decrementer(&self, ticks: u64) {
            self.decrementer.set(ticks);
        }

        fn relax(&self) {
            self.now.set(self.now.get() + 1);
        }
    }

    impl LocalInterrupts for Guest {
        fn enable(&self) {
            self.irqs.set(true);
        }

        fn disable(&self) {
            self.irqs.set(false);
        }

        fn are_enabled(&self) -> bool {
            self.irqs.get()
        }
    }

    impl Hypervisor for Guest {
        fn can_cede(&self) -> bool {
            self.can_cede
        }

        fn cede(&self) -> Result<(), HcallError> {
            assert!(!self.irqs.get(), "cede entered with interrupts enabled");
            self.cedes.set(self.cedes.get() + 1);
            match self.mode {
                CedeMode::Fail => Err(HcallError(-2)),
                CedeMode::Spurious => Ok(()),
                CedeMode::Deliver => {
                    let ticks = self.decrementer.get();
                    self.granted.set(self.granted.get() + ticks);
                    self.now.set(self.now.get() + ticks);

                    let mut frame = TrapFrame::for_vector(vector::DECREMENTER);
                    frame.msr = msr::EE;
                    assert!(self.traps.invoke(&mut frame));
                    self.ee_after_handler.set(frame.msr & msr::EE != 0);
                    Ok(())
                }
            }
        }
    }

    #[test]
    fn test_sleep_accumulates_granted_cycles() {
        let guest = Guest::new(CedeMode::Deliver);
        let cycles = 3 * Guest::DECREMENTER_MAX + 17;

        sleep_cycles(&guest, guest.traps, cycles).unwrap();

        assert_eq!(guest.cedes.get(), 4);
        assert!(guest.granted.get() >= cycles);
        assert!(!guest.ee_after_handler.get());
        // The handler re-armed the decrementer as far out as possible.
        assert_eq!(guest.decrementer.get(), Guest::DECREMENTER_MAX);
        assert!(!guest.traps.is_installed(vector::DECREMENTER));
        assert!(guest.irqs.get());
    }

    #[test]
    fn test_zero_sleep_does_not_cede() {
        let guest = Guest::new(CedeMode::Deliver);
        sleep_cycles(&guest, guest.traps, 0).unwrap();
        assert_eq!(guest.cedes.get(), 0);
    }

    #[test]
    fn test_cede_failure_is_reported() {
        let guest = Guest::new(CedeMode::Fail);
        assert_eq!(
            sleep_cycles(&guest, guest.traps, 10),
            Err(WaitError::CedeFailed(-2))
        );
        assert!(!guest.traps.is_installed(vector::DECREMENTER));
    }

    #[test]
    fn test_wakeup_without_decrementer() {
        let guest = Guest::new(CedeMode::Spurious);
        assert_eq!(
            sleep_cycles(&guest, guest.traps, 10),
            Err(WaitError::UnexpectedWakeup)
        );
        assert!(!guest.traps.is_installed(vector::DECREMENTER));
    }

    #[test]
    fn test_sleep_with_claimed_decrementer() {
        fn other(_: &mut TrapFrame, _: usize) {}

        let guest = Guest::new(CedeMode::Deliver);
        guest
            .traps
            .install(vector::DECREMENTER, Some(other), 0)
            .unwrap();
        assert!(matches!(
            sleep_cycles(&guest, guest.traps, 10),
            Err(WaitError::Trap(_))
        ));
        assert_eq!(guest.cedes.get(), 0);
    }

    #[test]
    fn test_without_cede_falls_back_to_delay() {
        let mut guest = Guest::new(CedeMode::Fail);
        guest.can_cede = false;

        sleep_cycles(&guest, guest.traps, 50).unwrap();
        assert_eq!(guest.cedes.get(), 0);
        assert!(guest.now.get() >= 1_050);
    }

    #[test]
    fn test_delay_waits_for_cycles() {
        let tb = MockTimebase::new(7);
        delay(&tb, 100);
        assert!(tb.now() >= 107);
    }

    #[test]
    fn test_delay_boundaries() {
        for cycles in [0, 1, 10_000] {
            let tb = MockTimebase::new(1);
            delay(&tb, cycles);
            // One read for the start, then one per elapsed cycle.
            assert_eq!(tb.now(), cycles.max(1) + 1);
        }
    }

    #[test]
    fn test_micros_to_cycles() {
        assert_eq!(micros_to_cycles(1, 512_000_000), 512);
        assert_eq!(micros_to_cycles(1_000_000, 512_000_000), 512_000_000);
        assert_eq!(micros_to_cycles(u64::MAX, u64::MAX), u64::MAX);
    }
}
