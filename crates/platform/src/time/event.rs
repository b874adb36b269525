use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{Result, TimerError};

/// Capability handed to the event timer. The one method runs in interrupt
/// context when an armed compare value matches; implementors carry whatever
/// state they need.
pub trait CompareMatch: Send + Sync {
    fn on_compare_match(&self);
}

/// A device that can deliver one-shot compare-match events.
///
/// There is no periodic mode; consumers that want a tick stream rearm from
/// their own callback.
pub trait EventSource: Send + Sync {
    /// Register the dispatch target. At most one registration outstanding;
    /// a later registration replaces the earlier one.
    fn set_client(&self, client: Arc<dyn CompareMatch>);

    /// Arm (or rearm) the one-shot for `ticks` from now.
    ///
    /// `None` means the caller supplied no deadline and fails with
    /// [`TimerError::InvalidDeadline`] without touching hardware.
    fn arm(&self, ticks: Option<u32>) -> Result<()>;

    /// Disable the one-shot. Idempotent; cancelling an idle timer is Ok.
    fn cancel(&self) -> Result<()>;
}

pub struct EventTimerRegistration {
    pub name: &'static str,
    pub frequency_hz: u32,
    pub quality: i32,
    /// Shortest armable deadline, in ticks.
    pub min_period_ticks: u32,
    /// Longest armable deadline, in ticks.
    pub max_period_ticks: u32,
    pub source: Arc<dyn EventSource>,
}

impl EventTimerRegistration {
    pub fn min_period(&self) -> Duration {
        self.period(self.min_period_ticks)
    }

    pub fn max_period(&self) -> Duration {
        self.period(self.max_period_ticks)
    }

    fn period(&self, ticks: u32) -> Duration {
        let nanos = u64::from(ticks) * 1_000_000_000 / u64::from(self.frequency_hz);
        Duration::from_nanos(nanos)
    }
}

/// One-slot registry for the canonical one-shot timer, same first-install
/// rule as the counter slot.
pub struct EventTimers {
    current: OnceLock<EventTimerRegistration>,
}

impl EventTimers {
    pub const fn new() -> Self {
        Self {
            current: OnceLock::new(),
        }
    }

    pub fn install(&self, reg: EventTimerRegistration) -> bool {
        debug_assert!(reg.frequency_hz > 0);
        self.current.set(reg).is_ok()
    }

    pub fn registration(&self) -> Option<&EventTimerRegistration> {
        self.current.get()
    }

    fn source(&self) -> Result<&Arc<dyn EventSource>> {
        self.current
            .get()
            .map(|reg| &reg.source)
            .ok_or(TimerError::NotInitialized)
    }

    /// Register the compare-match target on the installed timer.
    pub fn subscribe(&self, client: Arc<dyn CompareMatch>) -> Result<()> {
        self.source()?.set_client(client);
        Ok(())
    }

    /// Arm the installed timer, clamping the deadline to the advertised
    /// bounds.
    pub fn arm(&self, ticks: Option<u32>) -> Result<()> {
        let reg = self.current.get().ok_or(TimerError::NotInitialized)?;
        let ticks = ticks.map(|t| t.clamp(reg.min_period_ticks, reg.max_period_ticks));
        reg.source.arm(ticks)
    }

    pub fn cancel(&self) -> Result<()> {
        self.source()?.cancel()
    }

    pub fn system() -> &'static EventTimers {
        static SYSTEM: EventTimers = EventTimers::new();
        &SYSTEM
    }
}

impl Default for EventTimers {
    fn default() -> Self {
        Self::new()
    }
}
