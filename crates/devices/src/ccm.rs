/// Attach-time clock selection for the timer block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// No clock routed; the block cannot count.
    None,
    /// Peripheral bus clock at its native rate.
    InternalLow,
    /// Peripheral bus clock doubled.
    InternalHigh,
    /// Fixed 32.768 kHz reference.
    Reference32k,
    /// Off-chip clock pad. Board specific; there is no way to learn its
    /// rate here, so attach rejects it.
    External,
}

/// Rate of the 32.768 kHz reference. Fixed by the crystal, not the clock
/// controller.
pub const REFERENCE_32K_HZ: u32 = 32_768;

/// Root clocks the timer subsystem asks the clock controller about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootClock {
    /// Peripheral bus clock feeding the timer block.
    Peripheral,
    /// CPU core clock; feeds the spin-delay calibration.
    Cpu,
}

/// Upstream clock-controller lookup.
pub trait ClockTree: Send + Sync {
    /// Rate of `clock` in Hz, or `None` if the controller does not route it.
    fn frequency_hz(&self, clock: RootClock) -> Option<u32>;
}

/// Literal per-clock rates, for boards with static clocking and for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedClockTree {
    pub peripheral_hz: Option<u32>,
    pub cpu_hz: Option<u32>,
}

impl ClockTree for FixedClockTree {
    fn frequency_hz(&self, clock: RootClock) -> Option<u32> {
        match clock {
            RootClock::Peripheral => self.peripheral_hz,
            RootClock::Cpu => self.cpu_hz,
        }
    }
}
