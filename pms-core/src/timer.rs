//! Millisecond time base shared by both state machines.
//!
//! All deadlines are measured against a free-running, wrapping 32-bit
//! millisecond counter supplied by a [`Clock`]. Elapsed time is computed with
//! wrapping subtraction, so a deadline remains valid across a counter rollover
//! as long as it is shorter than ~49 days.

use core::fmt;

/// Wrapping millisecond count used for instants and durations alike.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Milliseconds(u32);

impl Milliseconds {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(millis: u32) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, tolerating counter wrap.
    #[must_use]
    pub const fn wrapping_since(self, earlier: Self) -> Self {
        Self(self.0.wrapping_sub(earlier.0))
    }

    #[must_use]
    pub const fn wrapping_add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }

    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Milliseconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Monotonic millisecond source.
pub trait Clock {
    /// Returns the current value of the free-running millisecond counter.
    fn now(&self) -> Milliseconds;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Milliseconds {
        (**self).now()
    }
}

/// Single-shot deadline.
///
/// Once armed, [`Timer::poll`] reports `true` exactly once, on the first call
/// where the elapsed time reaches the configured delay. Re-arming overwrites
/// any pending deadline.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Timer {
    started_at: Milliseconds,
    delay: Milliseconds,
    armed: bool,
}

impl Timer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            started_at: Milliseconds::ZERO,
            delay: Milliseconds::ZERO,
            armed: false,
        }
    }

    pub fn arm(&mut self, now: Milliseconds, delay: Milliseconds) {
        self.started_at = now;
        self.delay = delay;
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Returns `true` if the deadline elapsed since the last call, disarming the timer.
    pub fn poll(&mut self, now: Milliseconds) -> bool {
        if self.armed && now.wrapping_since(self.started_at) >= self.delay {
            self.armed = false;
            true
        } else {
            false
        }
    }

    /// Time left before the deadline, or `None` when disarmed.
    #[must_use]
    pub fn remaining(&self, now: Milliseconds) -> Option<Milliseconds> {
        self.armed
            .then(|| self.delay.saturating_sub(now.wrapping_since(self.started_at)))
    }
}

/// Free-running periodic timer counting elapsed intervals ("ticks").
///
/// Ticks accumulate while nobody looks; [`IntervalTimer::take_ready`]
/// consumes them all at once and [`IntervalTimer::retrigger`] restarts the
/// period from the supplied instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IntervalTimer {
    interval: Milliseconds,
    period_start: Milliseconds,
    ticks: u32,
}

impl IntervalTimer {
    #[must_use]
    pub const fn new(now: Milliseconds, interval: Milliseconds) -> Self {
        Self {
            interval: clamp_interval(interval),
            period_start: now,
            ticks: 0,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Milliseconds {
        self.interval
    }

    /// Changes the period; the current period start is preserved.
    pub fn set_interval(&mut self, interval: Milliseconds) {
        self.interval = clamp_interval(interval);
    }

    /// Restarts the period at `now`, discarding accumulated ticks.
    pub fn retrigger(&mut self, now: Milliseconds) {
        self.period_start = now;
        self.ticks = 0;
    }

    /// Number of whole periods elapsed and not yet consumed.
    pub fn peek_ticks(&mut self, now: Milliseconds) -> u32 {
        self.advance(now);
        self.ticks
    }

    /// Consumes pending ticks, returning `true` when at least one had elapsed.
    pub fn take_ready(&mut self, now: Milliseconds) -> bool {
        self.advance(now);
        let ready = self.ticks != 0;
        self.ticks = 0;
        ready
    }

    /// Time until the next tick; zero when one is already pending.
    pub fn remaining(&mut self, now: Milliseconds) -> Milliseconds {
        self.advance(now);
        if self.ticks != 0 {
            return Milliseconds::ZERO;
        }
        self.interval
            .saturating_sub(now.wrapping_since(self.period_start))
    }

    fn advance(&mut self, now: Milliseconds) {
        let elapsed = now.wrapping_since(self.period_start).as_u32();
        let periods = elapsed / self.interval.as_u32();
        if periods != 0 {
            self.ticks = self.ticks.saturating_add(periods);
            self.period_start = self
                .period_start
                .wrapping_add(Milliseconds::new(periods * self.interval.as_u32()));
        }
    }
}

const fn clamp_interval(interval: Milliseconds) -> Milliseconds {
    if interval.as_u32() == 0 {
        Milliseconds::new(1)
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u32) -> Milliseconds {
        Milliseconds::new(value)
    }

    #[test]
    fn timer_fires_once_after_delay() {
        let mut timer = Timer::new();
        timer.arm(ms(100), ms(10));

        assert!(!timer.poll(ms(109)));
        assert!(timer.poll(ms(110)));
        assert!(!timer.poll(ms(111)));
        assert!(!timer.is_armed());
    }

    #[test]
    fn timer_survives_counter_wrap() {
        let mut timer = Timer::new();
        timer.arm(ms(u32::MAX - 4), ms(10));

        assert!(!timer.poll(ms(4)));
        assert!(timer.poll(ms(5)));
    }

    #[test]
    fn rearming_overwrites_deadline() {
        let mut timer = Timer::new();
        timer.arm(ms(0), ms(10));
        timer.arm(ms(5), ms(100));

        assert!(!timer.poll(ms(50)));
        assert_eq!(timer.remaining(ms(50)), Some(ms(55)));
        assert!(timer.poll(ms(105)));
        assert_eq!(timer.remaining(ms(106)), None);
    }

    #[test]
    fn interval_counts_elapsed_periods() {
        let mut interval = IntervalTimer::new(ms(0), ms(1_000));

        assert_eq!(interval.peek_ticks(ms(999)), 0);
        assert_eq!(interval.remaining(ms(999)), ms(1));
        assert_eq!(interval.peek_ticks(ms(3_500)), 3);
        assert_eq!(interval.remaining(ms(3_500)), Milliseconds::ZERO);
        assert!(interval.take_ready(ms(3_500)));
        assert!(!interval.take_ready(ms(3_600)));
        assert_eq!(interval.remaining(ms(3_600)), ms(400));
    }

    #[test]
    fn retrigger_restarts_period() {
        let mut interval = IntervalTimer::new(ms(0), ms(1_000));
        interval.retrigger(ms(1_500));

        assert!(!interval.take_ready(ms(2_400)));
        assert!(interval.take_ready(ms(2_500)));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let interval = IntervalTimer::new(ms(0), Milliseconds::ZERO);
        assert_eq!(interval.interval(), ms(1));
    }
}
