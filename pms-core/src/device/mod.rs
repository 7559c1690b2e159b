//! PMS7003 device-control state machine.
//!
//! [`Device`] owns the sensor's supply rail, reset and mode lines, and serial
//! link. Callers steer it with requests (`request_*`) and the wake event; every
//! setter re-evaluates the machine immediately. [`Device::poll`] must be called
//! regularly to drain received bytes, detect transmit completion, and expire
//! timers.
//!
//! Power-up runs `Off -> RequestPowerOn -> Reset -> Normal`; from any operating
//! state an `Off` request (or `end`) powers the sensor down and a `Reset`
//! request pulses the reset line.

mod hal;
mod state;

pub use hal::{
    DebugFlags, DiscardMeasurements, Hal, MeasurementSink, PinDriver, PinHal, PinState,
    RailTiming, Uart,
};
pub use state::{DeviceState, Event, EventSet, Request, RequestSet};

use crate::codec::{Command, FrameParser, ParseOutcome, RxStats};
use crate::fmt::Hex;
use crate::telemetry::TelemetryRecorder;
use crate::timer::{Clock, Milliseconds, Timer};

/// Serial speed used by the sensor.
pub const BAUD_RATE: u32 = 9_600;

/// Minimum reset pulse width.
pub const RESET_PULSE: Milliseconds = Milliseconds::new(10);

/// How long to wait for a report after a passive read command.
pub const PASSIVE_READ_TIMEOUT: Milliseconds = Milliseconds::new(1_000);

/// Number of state entries kept in the device history.
pub const DEVICE_HISTORY: usize = 16;

/// Tunables for [`Device`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    pub baud_rate: u32,
    pub reset_pulse: Milliseconds,
    pub passive_read_timeout: Milliseconds,
}

impl DeviceConfig {
    pub const DEFAULT: Self = Self::new(BAUD_RATE, RESET_PULSE, PASSIVE_READ_TIMEOUT);

    #[must_use]
    pub const fn new(
        baud_rate: u32,
        reset_pulse: Milliseconds,
        passive_read_timeout: Milliseconds,
    ) -> Self {
        Self {
            baud_rate,
            reset_pulse,
            passive_read_timeout,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const NORMAL_ALLOWED: RequestSet =
    RequestSet::of(&[Request::HwSleep, Request::Sleep, Request::Passive]);

// power-up already includes a reset, so only mode requests survive Off
const OFF_RETAINED: RequestSet = RequestSet::of(&[
    Request::HwSleep,
    Request::Sleep,
    Request::Passive,
    Request::Normal,
    Request::Measure,
]);

const PASSIVE_ALLOWED: RequestSet = RequestSet::of(&[
    Request::HwSleep,
    Request::Sleep,
    Request::Normal,
    Request::Measure,
]);

/// Device-control state machine for one sensor.
pub struct Device<H, U, C> {
    hal: H,
    uart: U,
    clock: C,
    config: DeviceConfig,
    state: DeviceState,
    entry_pending: bool,
    running: bool,
    exit_requested: bool,
    events: EventSet,
    requests: RequestSet,
    timer: Timer,
    uart_enabled: bool,
    tx_active: bool,
    /// Transmit headroom observed just before the in-flight command was written.
    tx_headroom: usize,
    parser: FrameParser,
    history: TelemetryRecorder<DeviceState, DEVICE_HISTORY>,
}

impl<H, U, C> Device<H, U, C>
where
    H: Hal,
    U: Uart,
    C: Clock,
{
    pub fn new(hal: H, uart: U, clock: C, config: DeviceConfig) -> Self {
        Self {
            hal,
            uart,
            clock,
            config,
            state: DeviceState::Initial,
            entry_pending: true,
            running: false,
            exit_requested: false,
            events: EventSet::new(),
            requests: RequestSet::EMPTY,
            timer: Timer::new(),
            uart_enabled: false,
            tx_active: false,
            tx_headroom: 0,
            parser: FrameParser::new(),
            history: TelemetryRecorder::new(),
        }
    }

    /// Starts the machine: HAL bring-up followed by the rail-off settle.
    ///
    /// Has no effect while already running. Receive statistics survive a restart.
    pub fn begin(&mut self) {
        if self.running {
            return;
        }

        self.running = true;
        self.exit_requested = false;
        self.state = DeviceState::Initial;
        self.entry_pending = true;
        self.events.clear_all();
        self.requests.clear();
        self.timer.disarm();
        self.tx_active = false;
        self.record_entry();
        self.evaluate();
    }

    /// Powers the sensor down and runs the machine until it reaches [`DeviceState::Final`].
    ///
    /// Blocks for as long as the power-down sequence takes on the supplied clock.
    pub fn end(&mut self) {
        if !self.running {
            return;
        }

        self.exit_requested = true;
        self.evaluate();
        while self.running {
            self.poll(&mut DiscardMeasurements);
        }
    }

    /// Services the serial link and timer, delivering each valid report to `sink`.
    pub fn poll<S: MeasurementSink + ?Sized>(&mut self, sink: &mut S) {
        if self.uart_enabled {
            while self.uart.bytes_available() > 0 {
                let Some(byte) = self.uart.read_byte() else {
                    break;
                };
                self.receive(byte, sink);
            }

            if self.tx_active && self.uart.write_headroom() >= self.tx_headroom {
                self.tx_active = false;
                self.set_event(Event::TxDone);
            }
        }

        let now = self.clock.now();
        if self.timer.poll(now) {
            self.set_event(Event::Timer);
        }
    }

    fn receive<S: MeasurementSink + ?Sized>(&mut self, byte: u8, sink: &mut S) {
        match self.parser.push(byte) {
            ParseOutcome::Pending => {}
            ParseOutcome::Discarded { byte, dropped } => {
                if self.hal.is_enabled(DebugFlags::RX_DISCARD) {
                    debug!("rx discard {} (dropped {})", byte, dropped);
                }
            }
            ParseOutcome::BadChecksum => {
                if self.hal.is_enabled(DebugFlags::WARNING) {
                    warn!("rx checksum mismatch");
                }
            }
            ParseOutcome::Frame(report) => {
                sink.on_measurement(&report);
                self.set_event(Event::NewData);
            }
        }
    }

    pub fn request_off(&mut self) {
        self.set_request(Request::Off);
    }

    pub fn request_reset(&mut self) {
        self.set_request(Request::Reset);
    }

    pub fn request_hw_sleep(&mut self) {
        self.set_request(Request::HwSleep);
    }

    pub fn request_sleep(&mut self) {
        self.set_request(Request::Sleep);
    }

    pub fn request_passive(&mut self) {
        self.set_request(Request::Passive);
    }

    pub fn request_normal(&mut self) {
        self.set_request(Request::Normal);
    }

    pub fn request_measure(&mut self) {
        self.set_request(Request::Measure);
    }

    /// Posts `request` and re-evaluates.
    pub fn set_request(&mut self, request: Request) {
        self.requests.insert(request);
        self.evaluate();
    }

    /// Powers the sensor up from `Off`, or wakes it from either sleep.
    pub fn event_wake(&mut self) {
        self.set_event(Event::Wake);
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn rx_stats(&self) -> RxStats {
        self.parser.stats()
    }

    /// Requests posted but not yet honored or discarded.
    #[must_use]
    pub fn pending_requests(&self) -> RequestSet {
        self.requests
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> &TelemetryRecorder<DeviceState, DEVICE_HISTORY> {
        &self.history
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    #[must_use]
    pub fn uart(&self) -> &U {
        &self.uart
    }

    pub fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    fn set_event(&mut self, event: Event) {
        self.events.set(event);
        self.evaluate();
    }

    fn arm_timer(&mut self, delay: Milliseconds) {
        // a stale expiry must not satisfy the new wait
        self.events.clear(Event::Timer);
        let now = self.clock.now();
        self.timer.arm(now, delay);
    }

    fn send(&mut self, command: Command) {
        let frame = command.encode();
        self.tx_active = true;
        self.events.clear(Event::TxDone);
        self.tx_headroom = self.uart.write_headroom();
        let accepted = self.uart.write(&frame);

        if self.hal.is_enabled(DebugFlags::TX_DATA) {
            debug!("TX: {}", Hex(&frame));
        }
        if accepted < frame.len() && self.hal.is_enabled(DebugFlags::WARNING) {
            warn!("tx truncated: {} of {} bytes", accepted, frame.len());
        }
    }

    fn record_entry(&mut self) {
        let now = self.clock.now();
        self.history.record(self.state, now);
    }

    fn evaluate(&mut self) {
        if !self.running {
            return;
        }

        loop {
            let entry = core::mem::take(&mut self.entry_pending);
            if entry && self.hal.is_enabled(DebugFlags::TRACE) {
                trace!("device: enter {}", self.state.name());
            }

            match self.dispatch(self.state, entry) {
                Some(next) if next != self.state => {
                    self.state = next;
                    self.entry_pending = true;
                    self.record_entry();
                }
                _ => break,
            }

            if !self.running {
                break;
            }
        }
    }

    fn dispatch(&mut self, state: DeviceState, entry: bool) -> Option<DeviceState> {
        match state {
            DeviceState::Initial => Some(DeviceState::InitialSetup),

            DeviceState::InitialSetup => {
                if entry {
                    self.hal.begin();
                    let settle = self.hal.set_5v_enable(false);
                    self.arm_timer(settle);
                }
                self.events
                    .take(Event::Timer)
                    .then_some(DeviceState::Off)
            }

            DeviceState::Off => {
                self.requests.retain(OFF_RETAINED);
                if self.exit_requested {
                    Some(DeviceState::Final)
                } else if self.events.take(Event::Wake) {
                    Some(DeviceState::RequestPowerOn)
                } else {
                    None
                }
            }

            DeviceState::RequestPowerOn => {
                if entry {
                    let settle = self.hal.set_5v_enable(true);
                    self.arm_timer(settle);
                }
                if self.events.take(Event::Timer) {
                    self.uart.open(self.config.baud_rate);
                    self.uart_enabled = true;
                    self.parser.reset();
                    Some(DeviceState::Reset)
                } else {
                    None
                }
            }

            DeviceState::Reset => {
                if entry {
                    self.hal.set_reset(PinState::Low);
                    self.arm_timer(self.config.reset_pulse);
                }
                if self.events.take(Event::Timer) {
                    self.hal.set_reset(PinState::High);
                    Some(DeviceState::Normal)
                } else {
                    None
                }
            }

            DeviceState::RequestPowerDown => {
                if entry {
                    self.hal.set_reset(PinState::Low);
                    self.hal.set_mode(PinState::HighZ);
                    self.uart.close();
                    self.uart_enabled = false;
                    self.tx_active = false;
                    let settle = self.hal.set_5v_enable(false);
                    self.arm_timer(settle);
                }
                self.events
                    .take(Event::Timer)
                    .then_some(DeviceState::Off)
            }

            DeviceState::Final => {
                if entry {
                    self.hal.end();
                    self.running = false;
                    self.timer.disarm();
                }
                None
            }

            operating => {
                if self.requests.take(Request::Off) || self.exit_requested {
                    Some(DeviceState::RequestPowerDown)
                } else if self.requests.take(Request::Reset) {
                    Some(DeviceState::Reset)
                } else {
                    self.dispatch_operating(operating, entry)
                }
            }
        }
    }

    fn dispatch_operating(&mut self, state: DeviceState, entry: bool) -> Option<DeviceState> {
        match state {
            DeviceState::Normal => {
                if entry {
                    self.hal.set_mode(PinState::High);
                }
                let before = self.requests;
                self.requests.retain(NORMAL_ALLOWED);
                if !before.is_empty() && self.hal.is_enabled(DebugFlags::TRACE) {
                    trace!(
                        "normal: requests {} -> {}",
                        before.bits(),
                        self.requests.bits()
                    );
                }

                if self.requests.take(Request::HwSleep) {
                    Some(DeviceState::NormalHwSleep)
                } else if self.requests.take(Request::Sleep) {
                    Some(DeviceState::NormalSleepCmd)
                } else if self.requests.take(Request::Passive) {
                    Some(DeviceState::PassiveSendCmd)
                } else {
                    None
                }
            }

            DeviceState::Passive => {
                if entry {
                    self.hal.set_mode(PinState::High);
                }
                self.requests.retain(PASSIVE_ALLOWED);

                if self.requests.take(Request::HwSleep) {
                    Some(DeviceState::PassiveHwSleep)
                } else if self.requests.take(Request::Sleep) {
                    Some(DeviceState::PassiveSleepCmd)
                } else if self.requests.take(Request::Normal) {
                    Some(DeviceState::NormalSendCmd)
                } else if self.requests.take(Request::Measure) {
                    Some(DeviceState::PassiveMeasureCmd)
                } else {
                    None
                }
            }

            DeviceState::PassiveSendCmd => {
                self.command_then(entry, Command::SetActive(false), DeviceState::Passive)
            }

            DeviceState::NormalSendCmd => {
                self.command_then(entry, Command::SetActive(true), DeviceState::Normal)
            }

            DeviceState::NormalHwSleep | DeviceState::PassiveHwSleep => {
                if entry {
                    self.hal.set_mode(PinState::Low);
                }
                let resume = if state == DeviceState::NormalHwSleep {
                    DeviceState::Normal
                } else {
                    DeviceState::Passive
                };
                self.events.take(Event::Wake).then_some(resume)
            }

            DeviceState::NormalSleepCmd => {
                self.command_then(entry, Command::SetAwake(false), DeviceState::NormalSwSleep)
            }

            DeviceState::PassiveSleepCmd => {
                self.command_then(entry, Command::SetAwake(false), DeviceState::PassiveSwSleep)
            }

            DeviceState::NormalSwSleep => self
                .events
                .take(Event::Wake)
                .then_some(DeviceState::NormalWakeCmd),

            DeviceState::PassiveSwSleep => self
                .events
                .take(Event::Wake)
                .then_some(DeviceState::PassiveWakeCmd),

            DeviceState::NormalWakeCmd => {
                self.command_then(entry, Command::SetAwake(true), DeviceState::Normal)
            }

            DeviceState::PassiveWakeCmd => {
                self.command_then(entry, Command::SetAwake(true), DeviceState::Passive)
            }

            DeviceState::PassiveMeasureCmd => {
                if entry {
                    self.send(Command::ReadPassive);
                    self.events.clear(Event::NewData);
                    self.arm_timer(self.config.passive_read_timeout);
                }
                if self.events.take(Event::NewData) {
                    Some(DeviceState::Passive)
                } else if self.events.take(Event::Timer) {
                    if self.hal.is_enabled(DebugFlags::WARNING) {
                        warn!("passive read timed out");
                    }
                    Some(DeviceState::Passive)
                } else {
                    None
                }
            }

            other => {
                if self.hal.is_enabled(DebugFlags::ERROR) {
                    error!("device: unexpected state {}", other.name());
                }
                None
            }
        }
    }

    /// Sends `command` on entry and moves to `next` once it has left the UART.
    fn command_then(
        &mut self,
        entry: bool,
        command: Command,
        next: DeviceState,
    ) -> Option<DeviceState> {
        if entry {
            self.send(command);
        }
        self.events.take(Event::TxDone).then_some(next)
    }
}
