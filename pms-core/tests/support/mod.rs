#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use pms_core::codec;
use pms_core::device::{
    DebugFlags, Device, DeviceConfig, PinDriver, PinHal, PinState, RailTiming, Uart,
};
use pms_core::measurement::Measurements;
use pms_core::orchestrator::{Board, LoopConfig, MeasurementLoop};
use pms_core::timer::{Clock, Milliseconds};
use pms_core::uplink::Uplink;

/// Manually advanced clock shared between the test and the code under test.
#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u32>>);

impl MockClock {
    pub fn advance(&self, millis: u32) {
        self.0.set(self.0.get().wrapping_add(millis));
    }

    pub fn millis(&self) -> u32 {
        self.0.get()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Milliseconds {
        Milliseconds::new(self.0.get())
    }
}

#[derive(Debug, Default)]
pub struct PinLog {
    pub rail: bool,
    pub reset: Option<PinState>,
    pub mode: Option<PinState>,
    pub writes: usize,
}

/// Pin driver recording the last level written to each line.
#[derive(Clone, Default)]
pub struct MockPins(Rc<RefCell<PinLog>>);

impl MockPins {
    pub fn rail(&self) -> bool {
        self.0.borrow().rail
    }

    pub fn reset(&self) -> Option<PinState> {
        self.0.borrow().reset
    }

    pub fn mode(&self) -> Option<PinState> {
        self.0.borrow().mode
    }
}

impl PinDriver for MockPins {
    fn drive_rail(&mut self, enable: bool) {
        let mut log = self.0.borrow_mut();
        log.rail = enable;
        log.writes += 1;
    }

    fn drive_reset(&mut self, state: PinState) {
        let mut log = self.0.borrow_mut();
        log.reset = Some(state);
        log.writes += 1;
    }

    fn drive_mode(&mut self, state: PinState) {
        let mut log = self.0.borrow_mut();
        log.mode = Some(state);
        log.writes += 1;
    }
}

#[derive(Debug, Default)]
pub struct UartLog {
    pub open: bool,
    pub baud: u32,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    /// Bytes accepted but not yet shifted out.
    pub queued: usize,
    pub hold_tx: bool,
}

/// Serial port whose transmit side drains instantly unless held.
#[derive(Clone, Default)]
pub struct MockUart(Rc<RefCell<UartLog>>);

impl MockUart {
    pub const TX_CAPACITY: usize = 64;

    pub fn is_open(&self) -> bool {
        self.0.borrow().open
    }

    pub fn baud(&self) -> u32 {
        self.0.borrow().baud
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    pub fn inject_report(&self, report: &Measurements<u16>) {
        self.inject(&codec::encode_frame(report));
    }

    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().tx.clone()
    }

    /// Keeps written bytes queued until [`MockUart::drain_tx`] releases them.
    pub fn hold_tx(&self) {
        self.0.borrow_mut().hold_tx = true;
    }

    /// Occupies transmit space with bytes from an earlier writer.
    pub fn preload_tx(&self, count: usize) {
        let mut log = self.0.borrow_mut();
        log.queued = (log.queued + count).min(Self::TX_CAPACITY);
    }

    pub fn drain_tx(&self, count: usize) {
        let mut log = self.0.borrow_mut();
        log.queued = log.queued.saturating_sub(count);
    }
}

impl Uart for MockUart {
    fn open(&mut self, baud: u32) {
        let mut log = self.0.borrow_mut();
        log.open = true;
        log.baud = baud;
    }

    fn close(&mut self) {
        self.0.borrow_mut().open = false;
    }

    fn bytes_available(&self) -> usize {
        self.0.borrow().rx.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut log = self.0.borrow_mut();
        let accepted = bytes.len().min(Self::TX_CAPACITY - log.queued);
        log.tx.extend_from_slice(&bytes[..accepted]);
        if log.hold_tx {
            log.queued += accepted;
        }
        accepted
    }

    fn write_headroom(&self) -> usize {
        Self::TX_CAPACITY - self.0.borrow().queued
    }
}

#[derive(Debug, Default)]
pub struct UplinkLog {
    pub sent: Vec<(u8, Vec<u8>)>,
    pub in_flight: bool,
    pub reject_start: bool,
    pub outcome: Option<bool>,
}

/// Uplink that completes on the poll after `start` with a configurable outcome.
#[derive(Clone)]
pub struct MockUplink(Rc<RefCell<UplinkLog>>);

impl Default for MockUplink {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(UplinkLog {
            outcome: Some(true),
            ..UplinkLog::default()
        })))
    }
}

impl MockUplink {
    pub fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.0.borrow().sent.clone()
    }

    pub fn reject_start(&self) {
        self.0.borrow_mut().reject_start = true;
    }
}

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Busy;

impl Uplink for MockUplink {
    type Error = Busy;

    fn start(&mut self, port: u8, payload: &[u8], _confirmed: bool) -> Result<(), Busy> {
        let mut log = self.0.borrow_mut();
        if log.reject_start {
            return Err(Busy);
        }
        log.sent.push((port, payload.to_vec()));
        log.in_flight = true;
        Ok(())
    }

    fn poll_complete(&mut self) -> Option<bool> {
        let mut log = self.0.borrow_mut();
        if !log.in_flight {
            return None;
        }
        log.in_flight = false;
        log.outcome
    }
}

#[derive(Debug, Default)]
pub struct BoardLog {
    pub light_sleeps: usize,
    pub deep_sleeps: Vec<u32>,
}

/// Board reporting a fixed battery voltage; deep sleep advances the clock.
#[derive(Clone)]
pub struct MockBoard {
    pub clock: MockClock,
    pub log: Rc<RefCell<BoardLog>>,
}

impl MockBoard {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            log: Rc::default(),
        }
    }
}

impl Board for MockBoard {
    fn vbat(&mut self) -> Option<f32> {
        Some(3.5)
    }

    fn light_sleep(&mut self) {
        self.log.borrow_mut().light_sleeps += 1;
    }

    fn deep_sleep(&mut self, duration: Milliseconds) {
        self.log.borrow_mut().deep_sleeps.push(duration.as_u32());
        self.clock.advance(duration.as_u32());
    }
}

pub type TestDevice = Device<PinHal<MockPins>, MockUart, MockClock>;
pub type TestLoop = MeasurementLoop<PinHal<MockPins>, MockUart, MockClock, MockUplink, MockBoard>;

pub struct Rig {
    pub clock: MockClock,
    pub pins: MockPins,
    pub uart: MockUart,
    pub uplink: MockUplink,
    pub board: MockBoard,
}

impl Rig {
    pub fn new() -> Self {
        let clock = MockClock::default();
        Self {
            board: MockBoard::new(clock.clone()),
            clock,
            pins: MockPins::default(),
            uart: MockUart::default(),
            uplink: MockUplink::default(),
        }
    }

    pub fn device(&self) -> TestDevice {
        Device::new(
            PinHal::new(self.pins.clone(), RailTiming::DEFAULT, DebugFlags::default()),
            self.uart.clone(),
            self.clock.clone(),
            DeviceConfig::DEFAULT,
        )
    }

    pub fn measurement_loop(&self, config: LoopConfig) -> TestLoop {
        MeasurementLoop::new(
            self.device(),
            self.uplink.clone(),
            self.board.clone(),
            config,
        )
    }
}

/// Report whose channels are `base`, `base + 1`, ... in wire order.
pub fn report(base: u16) -> Measurements<u16> {
    let mut channels = [0u16; 12];
    for (offset, channel) in (0u16..).zip(channels.iter_mut()) {
        *channel = base + offset;
    }
    Measurements::from_channels(channels)
}
