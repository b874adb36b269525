use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;
use timebase_platform::io::RegisterWindow;
use timebase_platform::irq::{InterruptHandler, InterruptLine, IrqStatus};
use timebase_platform::resources::{ResourceError, ResourceProvider};
use timebase_platform::time::counter::{CounterRegistration, CounterSource, Timecounter};
use timebase_platform::time::delay::Delay;
use timebase_platform::time::event::{
    CompareMatch, EventSource, EventTimerRegistration, EventTimers,
};
use timebase_platform::time::{self, TimerError};

use crate::ccm::{ClockSource, ClockTree, RootClock, REFERENCE_32K_HZ};

// Register offsets.
pub(crate) const REG_CTRL: u32 = 0x00;
pub(crate) const REG_PRESCALER: u32 = 0x04;
pub(crate) const REG_STATUS: u32 = 0x08;
pub(crate) const REG_INTR: u32 = 0x0c;
pub(crate) const REG_COMPARE1: u32 = 0x10;
pub(crate) const REG_COMPARE2: u32 = 0x14;
pub(crate) const REG_COMPARE3: u32 = 0x18;
pub(crate) const REG_CAPTURE1: u32 = 0x1c;
pub(crate) const REG_CAPTURE2: u32 = 0x20;
pub(crate) const REG_COUNT: u32 = 0x24;

// Control register bits.
pub(crate) const CTRL_EN: u32 = 1 << 0;
pub(crate) const CTRL_DBGEN: u32 = 1 << 2;
pub(crate) const CTRL_WAITEN: u32 = 1 << 3;
pub(crate) const CTRL_STOPEN: u32 = 1 << 5;
pub(crate) const CTRL_CLKSRC_SHIFT: u32 = 6;
pub(crate) const CTRL_CLKSRC_MASK: u32 = 0x7 << CTRL_CLKSRC_SHIFT;
pub(crate) const CTRL_FRR: u32 = 1 << 9;
pub(crate) const CTRL_SWR: u32 = 1 << 15;

// Clock source field values.
pub(crate) const CLKSRC_NONE: u32 = 0;
pub(crate) const CLKSRC_PERIPHERAL: u32 = 1;
pub(crate) const CLKSRC_PERIPHERAL_2X: u32 = 2;
pub(crate) const CLKSRC_EXTERNAL: u32 = 3;
pub(crate) const CLKSRC_32K: u32 = 4;

// Status and interrupt-enable bits; both registers share the layout. The
// three compare channels occupy bits 0..=2, input capture 3..=4, rollover
// bit 5. Status bits are write-1-to-clear.
pub(crate) const INT_OF1: u32 = 1 << 0;
pub(crate) const INT_ROV: u32 = 1 << 5;
pub(crate) const INT_ALL: u32 = 0x3f;

// The prescaler field is 12 bits; a stored value of n divides by n + 1.
pub(crate) const PRESCALER_VALUE_MASK: u32 = 0xfff;
const PRESCALER_MAX_DIVIDE: u32 = PRESCALER_VALUE_MASK + 1;

/// Deadline bounds advertised with the event timer registration, in ticks.
const MIN_ONESHOT_TICKS: u32 = 2;
const MAX_ONESHOT_TICKS: u32 = 0xffff_fff0;

/// Reads of a zero status register tolerated before the bridge declares the
/// interrupt stray. The hardware can latch status a beat after raising the
/// line; one or two reads cover that, the rest is margin.
const STATUS_POLL_BOUND: u32 = 64;

/// Rough cost of one spin-delay loop iteration, in CPU cycles.
const SPIN_CYCLES_PER_LOOP: u32 = 4;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// The selected source cannot clock the block, or its rate cannot be
    /// learned on this platform.
    #[error("unsupported clock source {0:?}")]
    UnsupportedClockSource(ClockSource),
    #[error("device resources unavailable: {0}")]
    ResourceUnavailable(ResourceError),
    #[error("interrupt hookup failed: {0}")]
    InterruptSetupFailed(ResourceError),
}

/// Attach-time configuration.
#[derive(Clone, Copy, Debug)]
pub struct GptConfig {
    pub clock_source: ClockSource,
    /// Counter rate the prescaler aims for. The achieved rate can differ;
    /// [`Gpt::tick_hz`] reports what the hardware was actually set to.
    pub target_hz: u32,
}

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            clock_source: ClockSource::InternalLow,
            target_hz: 100_000,
        }
    }
}

/// Driver for one general-purpose timer block: a free-running 32-bit
/// counter, one active output compare, one interrupt line.
///
/// The same counter backs three services at once. Raw reads feed the
/// free-running counter slot, compare channel 1 delivers the one-shot event
/// timer, and once platform init decides the counter is trustworthy it also
/// times the busy-wait loop.
pub struct Gpt {
    regs: Arc<dyn RegisterWindow>,
    irq: Arc<dyn InterruptLine>,
    /// Achieved counter rate after prescaling. Immutable once attached.
    tick_hz: u32,
    /// Serializes the {compare write, enable write} pair against rearms and
    /// the bridge's status read. Without it the counter could pass a freshly
    /// written target before the enable lands, parking the event until the
    /// counter wraps all the way back around.
    compare: Mutex<()>,
    /// Whether a one-shot schedule is outstanding. Checked at dispatch
    /// time, so a cancel that lands before dispatch suppresses delivery.
    armed: AtomicBool,
    client: Mutex<Option<Arc<dyn CompareMatch>>>,
    stray_count: AtomicU64,
    /// Whether this device's handler is the one on the line. Lines can be
    /// shared, so teardown may only unbind what this attach bound.
    line_bound: AtomicBool,
}

impl Gpt {
    /// Bring the block up and install it into the time frameworks.
    ///
    /// The enable bit is set last; nothing observes the device through the
    /// framework slots before its rate and registers are fully configured.
    /// Any failure releases everything acquired so far and leaves the
    /// slots untouched.
    pub fn attach(
        provider: &dyn ResourceProvider,
        config: GptConfig,
        clocks: &dyn ClockTree,
        counters: &Timecounter,
        timers: &EventTimers,
        delay: &Delay,
    ) -> Result<Arc<Gpt>, AttachError> {
        let regs = provider
            .register_window()
            .map_err(AttachError::ResourceUnavailable)?;
        let irq = provider
            .interrupt_line()
            .map_err(AttachError::ResourceUnavailable)?;

        let upstream_hz = resolve_upstream_hz(config.clock_source, clocks)?;

        // Full reset, then route the selected clock in free-run mode and
        // keep counting through low-power and debug states. The enable bit
        // stays clear until everything below is programmed.
        regs.write(REG_CTRL, CTRL_SWR);
        regs.write(
            REG_CTRL,
            clock_field(config.clock_source) | CTRL_FRR | CTRL_STOPEN | CTRL_WAITEN | CTRL_DBGEN,
        );

        // No interrupt sources until a one-shot is armed.
        regs.write(REG_INTR, 0);

        // Prescale the upstream clock down to the configured tick rate and
        // record the rate that actually results.
        let divide = (upstream_hz / config.target_hz.max(1)).clamp(1, PRESCALER_MAX_DIVIDE);
        regs.write(REG_PRESCALER, divide - 1);
        let tick_hz = upstream_hz / divide;
        tracing::debug!(
            clock_source = ?config.clock_source,
            upstream_hz,
            divide,
            tick_hz,
            "gpt: clock configured"
        );

        let gpt = Arc::new(Gpt {
            regs: Arc::clone(&regs),
            irq: Arc::clone(&irq),
            tick_hz,
            compare: Mutex::new(()),
            armed: AtomicBool::new(false),
            client: Mutex::new(None),
            stray_count: AtomicU64::new(0),
            line_bound: AtomicBool::new(false),
        });

        irq.bind(Arc::new(GptBridge {
            device: Arc::downgrade(&gpt),
        }))
        .map_err(AttachError::InterruptSetupFailed)?;
        gpt.line_bound.store(true, Ordering::Release);

        if !timers.install(EventTimerRegistration {
            name: "gpt-oneshot",
            frequency_hz: tick_hz,
            quality: 1000,
            min_period_ticks: MIN_ONESHOT_TICKS,
            max_period_ticks: MAX_ONESHOT_TICKS,
            source: gpt.clone() as Arc<dyn EventSource>,
        }) {
            tracing::debug!("gpt: event timer slot already filled");
        }

        // Quiesce before going live: no enables, nothing latched.
        regs.write(REG_INTR, 0);
        regs.write(REG_STATUS, INT_ALL);

        if !counters.install(CounterRegistration {
            name: "gpt",
            mask: !0,
            frequency_hz: tick_hz,
            quality: 500,
            source: gpt.clone() as Arc<dyn CounterSource>,
        }) {
            tracing::debug!("gpt: counter slot already filled");
        }

        // Until the switch to counter polling, busy-waits run calibrated
        // spin loops.
        if let Some(cpu_hz) = clocks.frequency_hz(RootClock::Cpu) {
            delay.calibrate_spin(cpu_hz / SPIN_CYCLES_PER_LOOP / 1_000_000);
        }

        regs.set_bits(REG_CTRL, CTRL_EN);
        tracing::info!(upstream_hz, tick_hz, "gpt: counter enabled");

        Ok(gpt)
    }

    /// Achieved counter rate in Hz.
    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Interrupts that arrived with no visible status within the poll
    /// bound and were dropped.
    pub fn stray_interrupts(&self) -> u64 {
        self.stray_count.load(Ordering::Relaxed)
    }

    fn compare_guard(&self) -> MutexGuard<'_, ()> {
        match self.compare.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn client_guard(&self) -> MutexGuard<'_, Option<Arc<dyn CompareMatch>>> {
        match self.client.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn service_interrupt(&self) -> IrqStatus {
        let (status, client) = {
            let _guard = self.compare_guard();

            let mut status = 0;
            for _ in 0..STATUS_POLL_BOUND {
                status = self.regs.read(REG_STATUS);
                if status != 0 {
                    break;
                }
            }
            if status == 0 {
                self.stray_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("gpt: interrupt with no status bits, dropping");
                return IrqStatus::Stray;
            }

            let client = if status & INT_OF1 != 0 && self.armed.load(Ordering::Acquire) {
                self.client_guard().clone()
            } else {
                None
            };
            (status, client)
        };

        // Dispatch outside the lock so the callback can rearm. Neither the
        // hardware enable nor the armed flag is cleared here; rearming or
        // cancelling is entirely the consumer's business.
        if let Some(client) = client {
            client.on_compare_match();
        }

        // Ack exactly the observed bits, unhandled ones included. A match
        // relatched between the status read and this write is wiped with
        // the old one; such a target behaves like any the counter has
        // already passed and waits out the wrap.
        self.regs.write(REG_STATUS, status);
        IrqStatus::Handled
    }
}

impl CounterSource for Gpt {
    fn read(&self) -> u32 {
        self.regs.read(REG_COUNT)
    }
}

impl EventSource for Gpt {
    fn set_client(&self, client: Arc<dyn CompareMatch>) {
        *self.client_guard() = Some(client);
    }

    fn arm(&self, ticks: Option<u32>) -> time::Result<()> {
        let Some(ticks) = ticks else {
            return Err(TimerError::InvalidDeadline);
        };

        let _guard = self.compare_guard();
        // The counter keeps running while we aim. A target it has already
        // passed stays armed until the full wrap brings the counter back;
        // there is no second compare channel backstopping that, so the
        // window between the read and the enable must stay narrow.
        let target = self.regs.read(REG_COUNT).wrapping_add(ticks);
        self.regs.write(REG_COMPARE1, target);
        // A latch left over from an earlier schedule shares the OF1 bit;
        // drop it before enabling so it cannot deliver as this one.
        self.regs.write(REG_STATUS, INT_OF1);
        self.regs.set_bits(REG_INTR, INT_OF1);
        self.armed.store(true, Ordering::Release);
        Ok(())
    }

    fn cancel(&self) -> time::Result<()> {
        let _guard = self.compare_guard();
        self.armed.store(false, Ordering::Release);
        self.regs.clear_bits(REG_INTR, INT_OF1);
        // Drop any already-latched match so the next arm starts clean.
        self.regs.write(REG_STATUS, INT_OF1);
        Ok(())
    }
}

impl fmt::Debug for Gpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpt")
            .field("tick_hz", &self.tick_hz)
            .field("armed", &self.armed.load(Ordering::Relaxed))
            .field("stray_count", &self.stray_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for Gpt {
    fn drop(&mut self) {
        if self.line_bound.load(Ordering::Acquire) {
            self.irq.unbind();
        }
    }
}

/// Interrupt-side half of the driver. Holds a weak reference so a detached
/// device is not kept alive by its own line.
struct GptBridge {
    device: Weak<Gpt>,
}

impl InterruptHandler for GptBridge {
    fn interrupt(&self) -> IrqStatus {
        match self.device.upgrade() {
            Some(gpt) => gpt.service_interrupt(),
            None => IrqStatus::Stray,
        }
    }
}

fn resolve_upstream_hz(source: ClockSource, clocks: &dyn ClockTree) -> Result<u32, AttachError> {
    let unsupported = || AttachError::UnsupportedClockSource(source);
    match source {
        ClockSource::None | ClockSource::External => Err(unsupported()),
        ClockSource::Reference32k => Ok(REFERENCE_32K_HZ),
        ClockSource::InternalLow => clocks
            .frequency_hz(RootClock::Peripheral)
            .ok_or_else(unsupported),
        ClockSource::InternalHigh => clocks
            .frequency_hz(RootClock::Peripheral)
            .map(|hz| hz.saturating_mul(2))
            .ok_or_else(unsupported),
    }
}

fn clock_field(source: ClockSource) -> u32 {
    let field = match source {
        ClockSource::None => CLKSRC_NONE,
        ClockSource::InternalLow => CLKSRC_PERIPHERAL,
        ClockSource::InternalHigh => CLKSRC_PERIPHERAL_2X,
        ClockSource::External => CLKSRC_EXTERNAL,
        ClockSource::Reference32k => CLKSRC_32K,
    };
    field << CTRL_CLKSRC_SHIFT
}
