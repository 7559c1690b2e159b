//! Simulated PMS7003, board and uplink used by the emulator.
//!
//! The sensor model sits behind two handles sharing one [`SensorModel`]:
//! [`SimPins`] drives its supply rail and control lines, [`SimUart`] carries
//! the serial traffic. Time comes from [`SimClock`], which runs at wall-clock
//! speed plus an offset the console can push forward.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, info};
use pms_core::codec::{self, COMMAND_LEN, Command};
use pms_core::device::{PinDriver, PinState, Uart};
use pms_core::measurement::Measurements;
use pms_core::orchestrator::Board;
use pms_core::timer::{Clock, Milliseconds};
use pms_core::uplink::{Environment, Uplink};

/// Interval between reports in active mode.
pub const REPORT_PERIOD_MS: u64 = 1_000;

/// Delay from reset release (or wake) to the first report.
pub const WARM_UP_MS: u64 = 2_500;

const TX_CAPACITY: usize = 64;

/// Wall clock plus a console-controlled offset.
#[derive(Clone)]
pub struct SimClock {
    started: Instant,
    offset: Rc<Cell<u64>>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            offset: Rc::default(),
        }
    }

    /// Moves simulated time forward without waiting.
    pub fn advance(&self, millis: u64) {
        self.offset.set(self.offset.get().saturating_add(millis));
    }

    #[must_use]
    pub fn millis(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        elapsed.saturating_add(self.offset.get())
    }
}

impl Clock for SimClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> Milliseconds {
        // the device clock wraps like a 32-bit millisecond counter
        Milliseconds::new(self.millis() as u32)
    }
}

/// Behavioural model of the sensor.
#[derive(Debug, Default)]
pub struct SensorModel {
    now: u64,
    powered: bool,
    reset: Option<PinState>,
    mode: Option<PinState>,
    uart_open: bool,
    active: bool,
    awake: bool,
    next_report_at: Option<u64>,
    to_host: VecDeque<u8>,
    from_host: Vec<u8>,
    seed: u32,
    reports: u32,
    commands: u32,
}

impl SensorModel {
    fn running(&self) -> bool {
        self.powered
            && self.reset == Some(PinState::High)
            && self.mode != Some(PinState::Low)
            && self.awake
    }

    fn schedule_warm_up(&mut self) {
        self.next_report_at = Some(self.now + WARM_UP_MS);
    }

    /// Advances the model to `now`, emitting any reports that fell due.
    pub fn tick(&mut self, now: u64) {
        self.now = now;
        if !self.running() || !self.active {
            return;
        }
        if let Some(due) = self.next_report_at {
            if now >= due {
                self.emit_report();
                self.next_report_at = Some(now + REPORT_PERIOD_MS);
            }
        }
    }

    fn emit_report(&mut self) {
        let report = self.sample();
        self.reports += 1;
        if self.uart_open {
            self.to_host.extend(codec::encode_frame(&report));
        }
    }

    fn sample(&mut self) -> Measurements<u16> {
        // xorshift jitter on top of a clean-air baseline
        let mut x = self.seed.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;

        let jitter = u16::try_from(x % 5).unwrap_or(0);
        let base = [8, 12, 14, 8, 12, 14, 1_500, 450, 90, 12, 4, 1];
        let mut channels = [0u16; 12];
        for (channel, base) in channels.iter_mut().zip(base) {
            *channel = base + jitter;
        }
        Measurements::from_channels(channels)
    }

    fn receive_command(&mut self, bytes: &[u8]) {
        self.from_host.extend_from_slice(bytes);
        while self.from_host.len() >= COMMAND_LEN {
            let Ok(frame) = <[u8; COMMAND_LEN]>::try_from(&self.from_host[..COMMAND_LEN]) else {
                break;
            };
            self.from_host.drain(..COMMAND_LEN);
            self.commands += 1;

            let Some(command) = Command::decode(&frame) else {
                debug!("sensor: ignoring malformed command {frame:02x?}");
                continue;
            };
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        debug!("sensor: {command:?}");
        match command {
            Command::SetActive(active) => {
                self.active = active;
                if active {
                    self.next_report_at = Some(self.now + REPORT_PERIOD_MS);
                }
            }
            Command::SetAwake(awake) => {
                self.awake = awake;
                if awake {
                    self.schedule_warm_up();
                }
            }
            Command::ReadPassive => {
                if self.running() && !self.active {
                    self.emit_report();
                }
            }
        }
    }

    fn power(&mut self, enable: bool) {
        if self.powered == enable {
            return;
        }
        self.powered = enable;
        self.to_host.clear();
        self.from_host.clear();
        // power-on defaults
        self.active = true;
        self.awake = true;
        self.next_report_at = None;
    }

    fn set_reset(&mut self, state: PinState) {
        let released = self.reset != Some(PinState::High) && state == PinState::High;
        self.reset = Some(state);
        if released && self.powered {
            self.active = true;
            self.awake = true;
            self.schedule_warm_up();
        }
    }

    fn set_mode(&mut self, state: PinState) {
        let woke = self.mode == Some(PinState::Low) && state != PinState::Low;
        self.mode = Some(state);
        if woke && self.powered {
            self.schedule_warm_up();
        }
    }
}

/// Shared handle to the model; cloned into the pin driver and the UART.
#[derive(Clone, Default)]
pub struct SimSensor(Rc<RefCell<SensorModel>>);

impl SimSensor {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self(Rc::new(RefCell::new(SensorModel {
            seed,
            ..SensorModel::default()
        })))
    }

    pub fn tick(&self, now: u64) {
        self.0.borrow_mut().tick(now);
    }

    #[must_use]
    pub fn pins(&self) -> SimPins {
        SimPins(self.clone())
    }

    #[must_use]
    pub fn uart(&self) -> SimUart {
        SimUart(self.clone())
    }

    /// One-line summary for the `sensor` console command.
    #[must_use]
    pub fn describe(&self) -> String {
        let model = self.0.borrow();
        format!(
            "sensor: power={} reset={} mode={} {} {} reports={} commands={}",
            if model.powered { "on" } else { "off" },
            model.reset.map_or('-', PinState::as_char),
            model.mode.map_or('-', PinState::as_char),
            if model.active { "active" } else { "passive" },
            if model.awake { "awake" } else { "asleep" },
            model.reports,
            model.commands,
        )
    }
}

pub struct SimPins(SimSensor);

impl PinDriver for SimPins {
    fn drive_rail(&mut self, enable: bool) {
        (self.0).0.borrow_mut().power(enable);
    }

    fn drive_reset(&mut self, state: PinState) {
        (self.0).0.borrow_mut().set_reset(state);
    }

    fn drive_mode(&mut self, state: PinState) {
        (self.0).0.borrow_mut().set_mode(state);
    }
}

pub struct SimUart(SimSensor);

impl Uart for SimUart {
    fn open(&mut self, baud: u32) {
        debug!("uart: open at {baud} baud");
        (self.0).0.borrow_mut().uart_open = true;
    }

    fn close(&mut self) {
        let mut model = (self.0).0.borrow_mut();
        model.uart_open = false;
        model.to_host.clear();
    }

    fn bytes_available(&self) -> usize {
        (self.0).0.borrow().to_host.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (self.0).0.borrow_mut().to_host.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        (self.0).0.borrow_mut().receive_command(bytes);
        bytes.len()
    }

    fn write_headroom(&self) -> usize {
        TX_CAPACITY
    }
}

/// Uplink that prints each message as hex and always succeeds.
#[derive(Clone, Default)]
pub struct HexUplink {
    in_flight: bool,
    output: Rc<RefCell<Vec<String>>>,
    sent: u32,
}

impl HexUplink {
    /// Lines produced since the last call.
    #[must_use]
    pub fn drain_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.output.borrow_mut())
    }
}

impl Uplink for HexUplink {
    type Error = &'static str;

    fn start(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), Self::Error> {
        if self.in_flight {
            return Err("uplink busy");
        }
        self.sent += 1;
        let hex: String = payload.iter().map(|byte| format!("{byte:02X}")).collect();
        let line = format!(
            "uplink #{} port={port}{} len={} {hex}",
            self.sent,
            if confirmed { " confirmed" } else { "" },
            payload.len()
        );
        info!("{line}");
        self.output.borrow_mut().push(line);
        self.in_flight = true;
        Ok(())
    }

    fn poll_complete(&mut self) -> Option<bool> {
        std::mem::take(&mut self.in_flight).then_some(true)
    }
}

/// Board with fixed auxiliary readings; deep sleep fast-forwards the clock.
pub struct SimBoard {
    clock: SimClock,
    boot_count: u32,
}

impl SimBoard {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            boot_count: 1,
        }
    }
}

impl Board for SimBoard {
    fn vbat(&mut self) -> Option<f32> {
        Some(3.7)
    }

    fn vbus(&mut self) -> Option<f32> {
        Some(5.0)
    }

    fn boot_count(&mut self) -> Option<u32> {
        Some(self.boot_count)
    }

    fn environment(&mut self) -> Option<Environment> {
        Some(Environment {
            temperature: 21.5,
            pressure: 1_013.25,
            humidity: 45.0,
        })
    }

    fn deep_sleep(&mut self, duration: Milliseconds) {
        info!("deep sleep for {duration}");
        self.clock.advance(u64::from(duration.as_u32()));
        self.boot_count = self.boot_count.wrapping_add(1);
    }
}
