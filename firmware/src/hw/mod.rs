//! Board wiring for the PMS7003 on the STM32G0 controller.
//!
//! The 5 V enable is a push-pull output. Reset and mode must be able to float
//! while the sensor is unpowered, so both are `Flex` pins switched between
//! output and floating input.

use embassy_stm32::gpio::{Flex, Level, Output, Pull, Speed};
use embassy_time::Instant;
use pms_core::device::{PinDriver, PinState};
use pms_core::timer::{Clock, Milliseconds};

pub struct SensorPins<'d> {
    rail: Output<'d>,
    reset: Flex<'d>,
    mode: Flex<'d>,
}

impl<'d> SensorPins<'d> {
    #[must_use]
    pub fn new(rail: Output<'d>, reset: Flex<'d>, mode: Flex<'d>) -> Self {
        let mut pins = Self { rail, reset, mode };
        pins.rail.set_low();
        drive(&mut pins.reset, PinState::HighZ);
        drive(&mut pins.mode, PinState::HighZ);
        pins
    }
}

fn drive(pin: &mut Flex<'_>, state: PinState) {
    match state {
        PinState::Low => {
            pin.set_low();
            pin.set_as_output(Speed::Low);
        }
        PinState::High => {
            pin.set_high();
            pin.set_as_output(Speed::Low);
        }
        PinState::HighZ => pin.set_as_input(Pull::None),
    }
}

impl PinDriver for SensorPins<'_> {
    fn drive_rail(&mut self, enable: bool) {
        self.rail
            .set_level(if enable { Level::High } else { Level::Low });
    }

    fn drive_reset(&mut self, state: PinState) {
        drive(&mut self.reset, state);
    }

    fn drive_mode(&mut self, state: PinState) {
        drive(&mut self.mode, state);
    }
}

/// Millisecond clock backed by the embassy time driver.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> Milliseconds {
        // wraps after ~49 days; the timers compare with wrapping arithmetic
        Milliseconds::new(Instant::now().as_millis() as u32)
    }
}
