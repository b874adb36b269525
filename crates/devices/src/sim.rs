use std::sync::{Arc, Mutex, MutexGuard};

use timebase_platform::io::RegisterWindow;
use timebase_platform::irq::{InterruptLine, SoftIrqLine};
use timebase_platform::resources::FixedResources;

use crate::ccm::ClockSource;
use crate::gpt::{
    CLKSRC_32K, CLKSRC_EXTERNAL, CLKSRC_NONE, CLKSRC_PERIPHERAL, CLKSRC_PERIPHERAL_2X,
    CTRL_CLKSRC_MASK, CTRL_CLKSRC_SHIFT, CTRL_EN, CTRL_FRR, CTRL_SWR, INT_ALL, INT_OF1, INT_ROV,
    PRESCALER_VALUE_MASK, REG_CAPTURE1, REG_CAPTURE2, REG_COMPARE1, REG_COMPARE2, REG_COMPARE3,
    REG_COUNT, REG_CTRL, REG_INTR, REG_PRESCALER, REG_STATUS,
};

/// Software model of the timer block, register-accurate as far as the
/// driver cares: free-running count, equality-match compare latching,
/// write-1-to-clear status, and a level interrupt through a [`SoftIrqLine`].
///
/// Time only moves when a test moves it. `advance` steps the counter in
/// already-prescaled counter ticks and evaluates the line afterwards;
/// register writes never assert the line, mirroring hardware where the
/// interrupt shows up asynchronously rather than inside the store that
/// enabled it.
pub struct SimGpt {
    state: Mutex<SimState>,
    line: Arc<SoftIrqLine>,
}

struct SimState {
    ctrl: u32,
    prescaler: u32,
    status: u32,
    intr: u32,
    compare: [u32; 3],
    capture: [u32; 2],
    count: u32,
    /// Counter ticks added per bus read of the count register, so polled
    /// waits make progress without a second thread.
    auto_step: u32,
    /// Zero reads served per fresh status latch, modelling the beat of
    /// latency between the line and the status register.
    status_lag: u32,
    lag_remaining: u32,
    count_reads: u64,
}

impl SimState {
    fn power_on() -> Self {
        Self {
            ctrl: 0,
            prescaler: 0,
            status: 0,
            intr: 0,
            compare: [u32::MAX; 3],
            capture: [0; 2],
            count: 0,
            auto_step: 0,
            status_lag: 0,
            lag_remaining: 0,
            count_reads: 0,
        }
    }

    fn reset(&mut self) {
        // Harness knobs and read statistics survive a software reset.
        self.ctrl = 0;
        self.prescaler = 0;
        self.status = 0;
        self.intr = 0;
        self.compare = [u32::MAX; 3];
        self.capture = [0; 2];
        self.count = 0;
        self.lag_remaining = 0;
    }

    fn step(&mut self, ticks: u32) {
        let old = self.count;
        self.count = old.wrapping_add(ticks);
        let before = self.status;

        // Compare events latch on counter equality, enabled or not. A
        // value the counter already sits on does not re-match until the
        // full wrap returns to it.
        for (i, compare) in self.compare.iter().enumerate() {
            let offset = compare.wrapping_sub(old);
            if offset != 0 && offset <= ticks {
                self.status |= INT_OF1 << i;
            }
        }
        let to_zero = 0u32.wrapping_sub(old);
        if to_zero != 0 && to_zero <= ticks {
            self.status |= INT_ROV;
        }

        if self.status != before && self.status_lag > 0 {
            self.lag_remaining = self.status_lag;
        }
    }
}

impl SimGpt {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::power_on()),
            line: Arc::new(SoftIrqLine::new()),
        }
    }

    /// A block whose interrupt line refuses binds, for attach-failure
    /// tests.
    pub fn with_rejecting_line() -> Self {
        Self {
            state: Mutex::new(SimState::power_on()),
            line: Arc::new(SoftIrqLine::rejecting()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn line(&self) -> Arc<SoftIrqLine> {
        Arc::clone(&self.line)
    }

    /// Bundle this block's handles the way a board resource table would.
    pub fn resources(self: &Arc<Self>) -> FixedResources {
        FixedResources {
            regs: Arc::clone(self) as Arc<dyn RegisterWindow>,
            irq: self.line() as Arc<dyn InterruptLine>,
        }
    }

    /// Move time forward by `ticks` counter ticks, then evaluate the line.
    pub fn advance(&self, ticks: u32) {
        let pending = {
            let mut state = self.state();
            if state.ctrl & CTRL_EN == 0 {
                false
            } else {
                state.step(ticks);
                state.status & state.intr != 0
            }
        };
        // Fire with the state lock released; the handler reads registers.
        if pending {
            self.line.fire();
        }
    }

    /// Position the counter directly, with no event latching.
    pub fn set_counter(&self, value: u32) {
        self.state().count = value;
    }

    /// Raw counter value, bypassing the bus (no auto-step, no read count).
    pub fn counter(&self) -> u32 {
        self.state().count
    }

    pub fn set_auto_step(&self, ticks: u32) {
        self.state().auto_step = ticks;
    }

    /// Serve `reads` zero reads of the status register after each fresh
    /// latch before the real value becomes visible.
    pub fn set_status_lag(&self, reads: u32) {
        self.state().status_lag = reads;
    }

    pub fn count_reads(&self) -> u64 {
        self.state().count_reads
    }

    pub fn counting(&self) -> bool {
        self.state().ctrl & CTRL_EN != 0
    }

    pub fn free_running(&self) -> bool {
        self.state().ctrl & CTRL_FRR != 0
    }

    pub fn selected_clock(&self) -> Option<ClockSource> {
        let field = (self.state().ctrl & CTRL_CLKSRC_MASK) >> CTRL_CLKSRC_SHIFT;
        match field {
            CLKSRC_NONE => Some(ClockSource::None),
            CLKSRC_PERIPHERAL => Some(ClockSource::InternalLow),
            CLKSRC_PERIPHERAL_2X => Some(ClockSource::InternalHigh),
            CLKSRC_EXTERNAL => Some(ClockSource::External),
            CLKSRC_32K => Some(ClockSource::Reference32k),
            _ => None,
        }
    }

    /// Effective prescaler division factor.
    pub fn prescaler_divide(&self) -> u32 {
        (self.state().prescaler & PRESCALER_VALUE_MASK) + 1
    }

    pub fn compare1(&self) -> u32 {
        self.state().compare[0]
    }

    pub fn compare1_irq_enabled(&self) -> bool {
        self.state().intr & INT_OF1 != 0
    }

    pub fn compare1_pending(&self) -> bool {
        self.state().status & INT_OF1 != 0
    }

    pub fn rollover_pending(&self) -> bool {
        self.state().status & INT_ROV != 0
    }
}

impl Default for SimGpt {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterWindow for SimGpt {
    fn read(&self, offset: u32) -> u32 {
        let mut state = self.state();
        match offset {
            REG_CTRL => state.ctrl,
            REG_PRESCALER => state.prescaler,
            REG_STATUS => {
                if state.lag_remaining > 0 {
                    state.lag_remaining -= 1;
                    0
                } else {
                    state.status
                }
            }
            REG_INTR => state.intr,
            REG_COMPARE1 => state.compare[0],
            REG_COMPARE2 => state.compare[1],
            REG_COMPARE3 => state.compare[2],
            REG_CAPTURE1 => state.capture[0],
            REG_CAPTURE2 => state.capture[1],
            REG_COUNT => {
                state.count_reads += 1;
                if state.auto_step > 0 && state.ctrl & CTRL_EN != 0 {
                    let step = state.auto_step;
                    state.step(step);
                }
                state.count
            }
            _ => 0,
        }
    }

    fn write(&self, offset: u32, value: u32) {
        let mut state = self.state();
        match offset {
            REG_CTRL => {
                if value & CTRL_SWR != 0 {
                    // Software reset; the bit self-clears.
                    state.reset();
                } else {
                    state.ctrl = value;
                }
            }
            REG_PRESCALER => state.prescaler = value & PRESCALER_VALUE_MASK,
            REG_STATUS => state.status &= !(value & INT_ALL),
            REG_INTR => state.intr = value & INT_ALL,
            REG_COMPARE1 => state.compare[0] = value,
            REG_COMPARE2 => state.compare[1] = value,
            REG_COMPARE3 => state.compare[2] = value,
            // Capture and count are read-only.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_sim() -> SimGpt {
        let sim = SimGpt::new();
        sim.write(REG_CTRL, CTRL_EN);
        sim
    }

    #[test]
    fn compare_latches_on_equality_crossing() {
        let sim = enabled_sim();
        sim.write(REG_COMPARE1, 10);
        sim.advance(9);
        assert!(!sim.compare1_pending());
        sim.advance(1);
        assert!(sim.compare1_pending());
    }

    #[test]
    fn status_latches_with_interrupt_disabled() {
        let sim = enabled_sim();
        sim.write(REG_COMPARE1, 5);
        sim.advance(20);
        assert!(sim.compare1_pending());
        assert!(!sim.compare1_irq_enabled());
    }

    #[test]
    fn a_target_already_passed_waits_for_the_wrap() {
        let sim = enabled_sim();
        sim.set_counter(100);
        sim.write(REG_COMPARE1, 100);
        sim.advance(1000);
        assert!(!sim.compare1_pending());
    }

    #[test]
    fn rollover_latches_when_count_wraps() {
        let sim = enabled_sim();
        sim.set_counter(u32::MAX - 1);
        sim.advance(3);
        assert!(sim.rollover_pending());
        assert_eq!(sim.counter(), 1);
    }

    #[test]
    fn status_writes_clear_only_written_bits() {
        let sim = enabled_sim();
        sim.write(REG_COMPARE1, 1);
        sim.set_counter(u32::MAX);
        sim.advance(2);
        assert!(sim.compare1_pending());
        assert!(sim.rollover_pending());

        sim.write(REG_STATUS, INT_OF1);
        assert!(!sim.compare1_pending());
        assert!(sim.rollover_pending());
    }

    #[test]
    fn software_reset_restores_power_on_state() {
        let sim = enabled_sim();
        sim.write(REG_PRESCALER, 0x2a);
        sim.write(REG_COMPARE1, 123);
        sim.advance(500);

        sim.write(REG_CTRL, CTRL_SWR);
        assert!(!sim.counting());
        assert_eq!(sim.counter(), 0);
        assert_eq!(sim.compare1(), u32::MAX);
        assert_eq!(sim.prescaler_divide(), 1);
        assert!(!sim.compare1_pending());
        assert_eq!(sim.read(REG_CTRL), 0);
    }

    #[test]
    fn status_lag_hides_fresh_latches_briefly() {
        let sim = enabled_sim();
        sim.set_status_lag(2);
        sim.write(REG_COMPARE1, 4);
        sim.advance(4);
        assert_eq!(sim.read(REG_STATUS), 0);
        assert_eq!(sim.read(REG_STATUS), 0);
        assert_eq!(sim.read(REG_STATUS), INT_OF1);
    }

    #[test]
    fn auto_step_moves_the_counter_per_read() {
        let sim = enabled_sim();
        sim.set_auto_step(3);
        assert_eq!(sim.read(REG_COUNT), 3);
        assert_eq!(sim.read(REG_COUNT), 6);
        assert_eq!(sim.count_reads(), 2);
        // Inspection bypasses the bus and does not step.
        assert_eq!(sim.counter(), 6);
    }

    #[test]
    fn disabled_counter_does_not_move() {
        let sim = SimGpt::new();
        sim.advance(100);
        assert_eq!(sim.counter(), 0);
    }
}
