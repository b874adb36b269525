//! Wraparound-safe arithmetic on 32-bit counter ticks.
//!
//! The counter is modulo 2^32. Spans stay meaningful as long as the real
//! elapsed time is under one wraparound period.

/// Ticks elapsed from `start` to `now`, modulo 2^32.
#[inline]
pub fn ticks_since(now: u32, start: u32) -> u32 {
    now.wrapping_sub(start)
}

/// Whether `now` has covered `ticks` ticks since `start`.
///
/// A direct `now >= start + ticks` compare misfires whenever the target sits
/// past the 2^32 boundary; the subtraction form does not.
#[inline]
pub fn has_reached(now: u32, start: u32, ticks: u32) -> bool {
    ticks_since(now, start) >= ticks
}

/// Microseconds to counter ticks at `tick_hz`, rounding down but never to
/// zero. A zero-length wait still covers one tick.
#[inline]
pub fn ticks_for_us(us: u32, tick_hz: u32) -> u32 {
    let ticks = u64::from(us) * u64::from(tick_hz) / 1_000_000;
    ticks.clamp(1, u64::from(u32::MAX)) as u32
}
