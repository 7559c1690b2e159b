//! Hardware seams consumed by the device state machine.

use core::fmt;
use core::ops::BitOr;

use crate::measurement::Measurements;
use crate::timer::Milliseconds;

/// Drive state of a sensor control line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinState {
    Low,
    High,
    /// Not driven (input / floating).
    HighZ,
}

impl PinState {
    /// Single-character name used in diagnostics: `0`, `1`, or `Z`.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            PinState::Low => '0',
            PinState::High => '1',
            PinState::HighZ => 'Z',
        }
    }

    #[must_use]
    pub const fn is_driven(self) -> bool {
        !matches!(self, PinState::HighZ)
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Diagnostic categories that can be enabled at runtime.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebugFlags(u32);

impl DebugFlags {
    pub const NONE: Self = Self(0);
    pub const ERROR: Self = Self(1 << 0);
    pub const WARNING: Self = Self(1 << 1);
    pub const TRACE: Self = Self(1 << 2);
    pub const INFO: Self = Self(1 << 3);
    /// Hex dump of every command frame sent.
    pub const TX_DATA: Self = Self(1 << 4);
    /// Echo of bytes discarded while resynchronizing.
    pub const RX_DISCARD: Self = Self(1 << 5);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        Self::ERROR.union(Self::WARNING)
    }
}

impl BitOr for DebugFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Board-level control of the sensor's supply rail and control pins.
pub trait Hal {
    /// Puts the control lines into a known idle configuration.
    fn begin(&mut self);

    /// Releases the control lines.
    fn end(&mut self);

    /// Switches the 5 V rail and returns how long to wait before it settles.
    ///
    /// Returns [`Milliseconds::ZERO`] when the rail is already in the requested state.
    fn set_5v_enable(&mut self, enable: bool) -> Milliseconds;

    fn get_5v_enable(&self) -> bool;

    fn set_reset(&mut self, state: PinState);

    fn get_reset(&self) -> PinState;

    fn set_mode(&mut self, state: PinState);

    fn get_mode(&self) -> PinState;

    fn debug_flags(&self) -> DebugFlags;

    fn set_debug_flags(&mut self, flags: DebugFlags);

    /// Returns `true` when diagnostics of the given category should be emitted.
    fn is_enabled(&self, flag: DebugFlags) -> bool {
        self.debug_flags().contains(flag)
    }
}

/// Byte transport connected to the sensor.
///
/// All calls must return immediately. `write` may accept fewer bytes than
/// offered; the outgoing buffer drains in the background.
pub trait Uart {
    fn open(&mut self, baud: u32);

    fn close(&mut self);

    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&self) -> usize;

    fn read_byte(&mut self) -> Option<u8>;

    /// Queues bytes for transmission, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Free space in the outgoing buffer. Equals its idle value once all queued
    /// bytes have left.
    fn write_headroom(&self) -> usize;
}

/// Receiver for validated sensor reports.
pub trait MeasurementSink {
    fn on_measurement(&mut self, report: &Measurements<u16>);
}

impl<F> MeasurementSink for F
where
    F: FnMut(&Measurements<u16>),
{
    fn on_measurement(&mut self, report: &Measurements<u16>) {
        self(report);
    }
}

/// Sink that discards every report.
#[derive(Copy, Clone, Debug, Default)]
pub struct DiscardMeasurements;

impl MeasurementSink for DiscardMeasurements {
    fn on_measurement(&mut self, _report: &Measurements<u16>) {}
}

/// Raw control of the three sensor lines, without any sequencing policy.
pub trait PinDriver {
    fn drive_rail(&mut self, enable: bool);

    fn drive_reset(&mut self, state: PinState);

    fn drive_mode(&mut self, state: PinState);
}

/// Rail settle delays applied by [`PinHal`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RailTiming {
    pub power_up: Milliseconds,
    pub power_down: Milliseconds,
}

impl RailTiming {
    pub const DEFAULT: Self = Self {
        power_up: Milliseconds::new(500),
        power_down: Milliseconds::new(100),
    };
}

impl Default for RailTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// [`Hal`] built on a [`PinDriver`].
///
/// Tracks the commanded pin states so redundant writes are skipped. Powering
/// the rail up holds reset low with the mode line floating; powering it down
/// floats both lines so nothing back-feeds the unpowered sensor.
pub struct PinHal<D> {
    driver: D,
    timing: RailTiming,
    rail: bool,
    reset: PinState,
    mode: PinState,
    debug: DebugFlags,
}

impl<D: PinDriver> PinHal<D> {
    pub fn new(driver: D, timing: RailTiming, debug: DebugFlags) -> Self {
        Self {
            driver,
            timing,
            rail: false,
            reset: PinState::HighZ,
            mode: PinState::HighZ,
            debug,
        }
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: PinDriver> Hal for PinHal<D> {
    fn begin(&mut self) {
        if self.is_enabled(DebugFlags::TRACE) {
            trace!("hal begin");
        }
        self.rail = false;
        self.driver.drive_rail(false);
        self.set_reset(PinState::HighZ);
        self.set_mode(PinState::HighZ);
    }

    fn end(&mut self) {
        if self.is_enabled(DebugFlags::TRACE) {
            trace!("hal end");
        }
        self.rail = false;
        self.driver.drive_rail(false);
        self.set_reset(PinState::HighZ);
        self.set_mode(PinState::HighZ);
    }

    fn set_5v_enable(&mut self, enable: bool) -> Milliseconds {
        if self.rail == enable {
            return Milliseconds::ZERO;
        }
        if self.is_enabled(DebugFlags::TRACE) {
            trace!("set5v: {}", enable);
        }

        self.rail = enable;
        self.driver.drive_rail(enable);
        if enable {
            self.set_reset(PinState::Low);
            self.set_mode(PinState::HighZ);
            self.timing.power_up
        } else {
            self.set_reset(PinState::HighZ);
            self.set_mode(PinState::HighZ);
            self.timing.power_down
        }
    }

    fn get_5v_enable(&self) -> bool {
        self.rail
    }

    fn set_reset(&mut self, state: PinState) {
        if self.reset == state {
            return;
        }
        if self.is_enabled(DebugFlags::TRACE) {
            trace!("setReset: {}", state.as_char());
        }
        self.reset = state;
        self.driver.drive_reset(state);
    }

    fn get_reset(&self) -> PinState {
        self.reset
    }

    fn set_mode(&mut self, state: PinState) {
        if self.mode == state {
            return;
        }
        if self.is_enabled(DebugFlags::TRACE) {
            trace!("setMode: {}", state.as_char());
        }
        self.mode = state;
        self.driver.drive_mode(state);
    }

    fn get_mode(&self) -> PinState {
        self.mode
    }

    fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    fn set_debug_flags(&mut self, flags: DebugFlags) {
        self.debug = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Line {
        Rail(bool),
        Reset(PinState),
        Mode(PinState),
    }

    #[derive(Default)]
    struct RecordingDriver {
        writes: Vec<Line, 16>,
    }

    impl PinDriver for RecordingDriver {
        fn drive_rail(&mut self, enable: bool) {
            self.writes.push(Line::Rail(enable)).expect("write log");
        }

        fn drive_reset(&mut self, state: PinState) {
            self.writes.push(Line::Reset(state)).expect("write log");
        }

        fn drive_mode(&mut self, state: PinState) {
            self.writes.push(Line::Mode(state)).expect("write log");
        }
    }

    #[test]
    fn rail_changes_report_settle_time() {
        let mut hal = PinHal::new(
            RecordingDriver::default(),
            RailTiming::DEFAULT,
            DebugFlags::NONE,
        );

        assert_eq!(hal.set_5v_enable(true), Milliseconds::new(500));
        assert_eq!(hal.get_reset(), PinState::Low);
        assert_eq!(hal.get_mode(), PinState::HighZ);
        assert_eq!(hal.set_5v_enable(true), Milliseconds::ZERO);
        assert_eq!(hal.set_5v_enable(false), Milliseconds::new(100));
        assert_eq!(hal.get_reset(), PinState::HighZ);
        assert!(!hal.get_5v_enable());
    }

    #[test]
    fn redundant_pin_writes_are_skipped() {
        let mut hal = PinHal::new(
            RecordingDriver::default(),
            RailTiming::DEFAULT,
            DebugFlags::NONE,
        );

        hal.set_mode(PinState::High);
        hal.set_mode(PinState::High);
        hal.set_reset(PinState::HighZ);

        assert_eq!(
            hal.driver().writes.as_slice(),
            &[Line::Mode(PinState::High)]
        );
    }

    #[test]
    fn debug_flags_gate_categories() {
        let flags = DebugFlags::TRACE | DebugFlags::TX_DATA;
        assert!(flags.contains(DebugFlags::TRACE));
        assert!(!flags.contains(DebugFlags::RX_DISCARD));
        assert!(!flags.contains(DebugFlags::NONE));
        assert_eq!(flags.bits(), 0x14);
        assert_eq!(DebugFlags::default().bits(), 0x3);
    }

    #[test]
    fn pin_state_names() {
        assert_eq!(PinState::Low.as_char(), '0');
        assert_eq!(PinState::High.as_char(), '1');
        assert_eq!(PinState::HighZ.as_char(), 'Z');
        assert!(!PinState::HighZ.is_driven());
    }
}
