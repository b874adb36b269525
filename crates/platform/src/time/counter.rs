use std::sync::{Arc, OnceLock};

pub trait CounterSource: Send + Sync {
    /// Raw counter value. No side effects; callable from any context.
    fn read(&self) -> u32;
}

/// What a driver hands over when it installs a free-running counter.
pub struct CounterRegistration {
    pub name: &'static str,
    /// Significant counter bits. The full 32 for a 32-bit block.
    pub mask: u32,
    pub frequency_hz: u32,
    /// Ranking metadata among counters in the platform inventory.
    pub quality: i32,
    pub source: Arc<dyn CounterSource>,
}

/// One-slot registry for the canonical free-running counter.
pub struct Timecounter {
    current: OnceLock<CounterRegistration>,
}

impl Timecounter {
    pub const fn new() -> Self {
        Self {
            current: OnceLock::new(),
        }
    }

    /// Install `reg` as the canonical counter if none is installed yet.
    ///
    /// The first successful install wins; the slot is never cleared or
    /// displaced. Returns whether `reg` became canonical.
    pub fn install(&self, reg: CounterRegistration) -> bool {
        debug_assert!(reg.frequency_hz > 0);
        self.current.set(reg).is_ok()
    }

    pub fn registration(&self) -> Option<&CounterRegistration> {
        self.current.get()
    }

    pub fn frequency_hz(&self) -> Option<u32> {
        self.current.get().map(|reg| reg.frequency_hz)
    }

    /// Current counter value, masked to the significant bits.
    ///
    /// Reads 0 while no counter is installed. Early-boot callers get a
    /// value rather than a panic, and must not treat it as a measurement.
    pub fn read(&self) -> u32 {
        match self.current.get() {
            Some(reg) => reg.source.read() & reg.mask,
            None => 0,
        }
    }

    /// The process-wide instance behind [`counter_read`].
    pub fn system() -> &'static Timecounter {
        static SYSTEM: Timecounter = Timecounter::new();
        &SYSTEM
    }
}

impl Default for Timecounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the process-wide canonical counter.
pub fn counter_read() -> u32 {
    Timecounter::system().read()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FixedCounter(AtomicU32);

    impl CounterSource for FixedCounter {
        fn read(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn reg(name: &'static str, value: u32) -> CounterRegistration {
        CounterRegistration {
            name,
            mask: !0,
            frequency_hz: 100_000,
            quality: 500,
            source: Arc::new(FixedCounter(AtomicU32::new(value))),
        }
    }

    #[test]
    fn read_before_install_degrades_to_zero() {
        let tc = Timecounter::new();
        assert_eq!(tc.read(), 0);
        assert_eq!(tc.frequency_hz(), None);
        assert!(tc.registration().is_none());
    }

    #[test]
    fn first_install_wins() {
        let tc = Timecounter::new();
        assert!(tc.install(reg("a", 7)));
        assert!(!tc.install(reg("b", 9)));
        assert_eq!(tc.read(), 7);
        assert_eq!(tc.registration().map(|r| r.name), Some("a"));
    }

    #[test]
    fn read_applies_mask() {
        let tc = Timecounter::new();
        let mut r = reg("m", 0xffff_abcd);
        r.mask = 0x0000_ffff;
        assert!(tc.install(r));
        assert_eq!(tc.read(), 0xabcd);
    }
}
