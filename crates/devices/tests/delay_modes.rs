use std::sync::Arc;

use timebase_devices::ccm::{ClockSource, FixedClockTree};
use timebase_devices::gpt::{Gpt, GptConfig};
use timebase_devices::sim::SimGpt;
use timebase_platform::time::counter::Timecounter;
use timebase_platform::time::delay::{Delay, DelayMode};
use timebase_platform::time::event::EventTimers;
use timebase_platform::time::TimerError;

struct Harness {
    sim: Arc<SimGpt>,
    counters: Timecounter,
    delay: Delay,
}

fn harness() -> Harness {
    let sim = Arc::new(SimGpt::new());
    let counters = Timecounter::new();
    let timers = EventTimers::new();
    let delay = Delay::new();
    Gpt::attach(
        &sim.resources(),
        GptConfig::default(),
        &FixedClockTree {
            peripheral_hz: Some(66_500_000),
            cpu_hz: Some(800_000_000),
        },
        &counters,
        &timers,
        &delay,
    )
    .expect("attach");
    Harness {
        sim,
        counters,
        delay,
    }
}

#[test]
fn spin_mode_runs_before_any_switch() {
    let h = harness();
    // Calibrated from the 800 MHz CPU clock at attach.
    assert_eq!(h.delay.mode(), DelayMode::Spin { loops_per_us: 200 });

    h.delay.wait_us(&h.counters, 50);
    assert_eq!(h.sim.count_reads(), 0);
}

#[test]
fn switch_without_a_canonical_counter_is_rejected() {
    let delay = Delay::new();
    let empty = Timecounter::new();
    assert_eq!(
        delay.switch_to_counter(&empty),
        Err(TimerError::NotInitialized)
    );
    assert!(matches!(delay.mode(), DelayMode::Spin { .. }));
}

#[test]
fn switched_waits_poll_the_counter() {
    let h = harness();
    h.sim.set_auto_step(1);
    h.delay.switch_to_counter(&h.counters).unwrap();
    assert_eq!(h.delay.mode(), DelayMode::Counter);

    // 1 ms at 100 kHz is 100 ticks: a start read plus one per tick.
    h.delay.wait_us(&h.counters, 1_000);
    assert_eq!(h.sim.count_reads(), 101);
}

#[test]
fn zero_microseconds_still_waits_one_tick() {
    let h = harness();
    h.sim.set_auto_step(1);
    h.delay.switch_to_counter(&h.counters).unwrap();

    h.delay.wait_us(&h.counters, 0);
    assert_eq!(h.sim.count_reads(), 2);
}

#[test]
fn switched_waits_span_the_counter_wrap() {
    let h = harness();
    h.sim.set_auto_step(1);
    h.delay.switch_to_counter(&h.counters).unwrap();

    h.sim.set_counter(u32::MAX - 10);
    // 200 us at 100 kHz is 20 ticks, crossing the rollover.
    h.delay.wait_us(&h.counters, 200);
    assert_eq!(h.sim.count_reads(), 21);
    assert!(h.sim.counter() < 20);
}

#[test]
fn the_switch_is_permanent_across_later_attaches() {
    let h = harness();
    h.delay.switch_to_counter(&h.counters).unwrap();

    // A later block attaching re-runs spin calibration; the published
    // mode must hold.
    let second = Arc::new(SimGpt::new());
    let timers = EventTimers::new();
    Gpt::attach(
        &second.resources(),
        GptConfig {
            clock_source: ClockSource::Reference32k,
            ..GptConfig::default()
        },
        &FixedClockTree {
            peripheral_hz: None,
            cpu_hz: Some(996_000_000),
        },
        &h.counters,
        &timers,
        &h.delay,
    )
    .expect("attach");

    assert_eq!(h.delay.mode(), DelayMode::Counter);
}
