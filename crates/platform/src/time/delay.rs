use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};

use super::counter::Timecounter;
use super::ticks;
use super::{Result, TimerError};

/// How a busy-wait is timed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayMode {
    /// Calibrated spin loops, all that works before any counter hardware
    /// is attached and enabled.
    Spin { loops_per_us: u32 },
    /// Poll the canonical free-running counter.
    Counter,
}

/// Loop count per microsecond before anything has calibrated it. Assumes a
/// slow core, so early-boot waits run long rather than short.
const DEFAULT_SPIN_LOOPS_PER_US: u32 = 300;

/// Raw mode encoding: 0 is `Counter`, anything else is `Spin { loops }`.
const MODE_COUNTER: u32 = 0;

/// Dual-mode busy-wait.
///
/// Starts in spin mode and switches to counter polling exactly once, when
/// platform init decides the counter is trustworthy. The mode lives in one
/// atomic word, so readers never take a lock and the switch is a single
/// published store.
pub struct Delay {
    mode: AtomicU32,
}

impl Delay {
    pub const fn new() -> Self {
        Self {
            mode: AtomicU32::new(DEFAULT_SPIN_LOOPS_PER_US),
        }
    }

    pub fn mode(&self) -> DelayMode {
        match self.mode.load(Ordering::Acquire) {
            MODE_COUNTER => DelayMode::Counter,
            loops_per_us => DelayMode::Spin { loops_per_us },
        }
    }

    /// Refine the spin calibration. No effect once counter mode has been
    /// published; the spin to counter transition is one way.
    pub fn calibrate_spin(&self, loops_per_us: u32) {
        let loops_per_us = loops_per_us.max(1);
        let _ = self
            .mode
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != MODE_COUNTER).then_some(loops_per_us)
            });
    }

    /// Switch every future wait to counter polling.
    ///
    /// Requires a canonical counter behind `tc`. Idempotent; the transition
    /// never reverses.
    pub fn switch_to_counter(&self, tc: &Timecounter) -> Result<()> {
        let Some(frequency_hz) = tc.frequency_hz() else {
            return Err(TimerError::NotInitialized);
        };
        let was = self.mode.swap(MODE_COUNTER, Ordering::AcqRel);
        if was != MODE_COUNTER {
            tracing::info!(frequency_hz, "busy-wait now polls the hardware counter");
        }
        Ok(())
    }

    /// Busy-wait for `us` microseconds against `tc`.
    ///
    /// Blocks the calling thread without yielding; meant for short bounded
    /// waits. In counter mode a zero-microsecond wait still covers one tick.
    pub fn wait_us(&self, tc: &Timecounter, us: u32) {
        match self.mode() {
            DelayMode::Spin { loops_per_us } => spin_us(us, loops_per_us),
            DelayMode::Counter => match tc.frequency_hz() {
                Some(frequency_hz) => poll_counter(tc, us, frequency_hz),
                // Reachable only by pairing the switched mode with some
                // other, empty counter instance. Run long, not never.
                None => spin_us(us, DEFAULT_SPIN_LOOPS_PER_US),
            },
        }
    }

    /// The process-wide instance behind [`delay_us`].
    pub fn system() -> &'static Delay {
        static SYSTEM: Delay = Delay::new();
        &SYSTEM
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy-wait `us` microseconds on the process-wide delay and counter.
pub fn delay_us(us: u32) {
    Delay::system().wait_us(Timecounter::system(), us);
}

fn spin_us(us: u32, loops_per_us: u32) {
    let loops = u64::from(us) * u64::from(loops_per_us);
    for _ in 0..loops {
        hint::spin_loop();
    }
}

fn poll_counter(tc: &Timecounter, us: u32, frequency_hz: u32) {
    let span = ticks::ticks_for_us(us, frequency_hz);
    let start = tc.read();
    while !ticks::has_reached(tc.read(), start, span) {
        hint::spin_loop();
    }
}
