//! Measurement cycle scheduling.
//!
//! [`MeasurementLoop`] wraps a [`Device`] and runs the uplink cycle: wake the
//! sensor, wait for its first report, collect a full [`SampleWindow`], power it
//! down, reduce the window, and hand the encoded message to an [`Uplink`]. The
//! loop then sleeps until the uplink interval elapses.
//!
//! The first few cycles run at a fast interval; once the countdown reaches
//! zero the loop switches to the permanent interval.

mod window;

pub use window::SampleWindow;

use core::fmt;

use crate::device::{Device, DeviceState, Hal, Uart};
use crate::measurement::Measurements;
use crate::telemetry::TelemetryRecorder;
use crate::timer::{Clock, IntervalTimer, Milliseconds, Timer};
use crate::uplink::{Environment, PayloadBuffer, PayloadFormat, UPLINK_PORT, Uplink, UplinkPayload};

/// Reports collected per cycle.
pub const WINDOW_SIZE: usize = 10;

/// Longest wait for the sensor's first report after waking it.
pub const WAKE_TIMEOUT: Milliseconds = Milliseconds::from_secs(120);

/// Measuring-phase allowance per expected report.
pub const SAMPLE_ALLOWANCE: Milliseconds = Milliseconds::from_secs(2);

/// Pause between requesting power-down and building the uplink.
pub const POWER_DOWN_SETTLE: Milliseconds = Milliseconds::new(10);

/// Sleep is only worth entering with more than this much time left.
pub const SLEEP_THRESHOLD: Milliseconds = Milliseconds::new(1_500);

/// Deep sleep needs at least this many whole seconds remaining.
pub const DEEP_SLEEP_MIN_SECS: u32 = 2;

pub const FAST_TX_CYCLE: Milliseconds = Milliseconds::from_secs(30);
pub const FAST_TX_CYCLE_COUNT: u32 = 10;
pub const PERMANENT_TX_CYCLE: Milliseconds = Milliseconds::from_secs(360);

/// Entries kept in the loop history.
pub const LOOP_HISTORY: usize = 16;

/// Tunables for [`MeasurementLoop`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    pub wake_timeout: Milliseconds,
    pub sample_allowance: Milliseconds,
    pub power_down_settle: Milliseconds,
    pub sleep_threshold: Milliseconds,
    /// Interval used for the first `fast_cycle_count` cycles.
    pub tx_cycle: Milliseconds,
    pub fast_cycle_count: u32,
    pub permanent_cycle: Milliseconds,
    pub port: u8,
    pub confirmed: bool,
    pub format: PayloadFormat,
    pub deep_sleep: bool,
}

impl LoopConfig {
    pub const DEFAULT: Self = Self::new();

    #[must_use]
    pub const fn new() -> Self {
        Self {
            wake_timeout: WAKE_TIMEOUT,
            sample_allowance: SAMPLE_ALLOWANCE,
            power_down_settle: POWER_DOWN_SETTLE,
            sleep_threshold: SLEEP_THRESHOLD,
            tx_cycle: FAST_TX_CYCLE,
            fast_cycle_count: FAST_TX_CYCLE_COUNT,
            permanent_cycle: PERMANENT_TX_CYCLE,
            port: UPLINK_PORT,
            confirmed: false,
            format: PayloadFormat::Standard,
            deep_sleep: false,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Board services outside the particulate sensor.
///
/// Every reading is optional; absent readings leave their group out of the
/// uplink message.
pub trait Board {
    fn vbat(&mut self) -> Option<f32> {
        None
    }

    fn vsys(&mut self) -> Option<f32> {
        None
    }

    fn vbus(&mut self) -> Option<f32> {
        None
    }

    fn boot_count(&mut self) -> Option<u32> {
        None
    }

    fn environment(&mut self) -> Option<Environment> {
        None
    }

    fn tvoc(&mut self) -> Option<u16> {
        None
    }

    /// Idles briefly with peripherals running.
    fn light_sleep(&mut self) {}

    /// Stops the system for `duration`; the sensor is already shut down.
    fn deep_sleep(&mut self, duration: Milliseconds) {
        let _ = duration;
    }
}

/// Board with no auxiliary sensors and no low-power modes.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoBoard;

impl Board for NoBoard {}

/// States of the measurement cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    Initial,
    /// Stopped by the operator; the sensor is held off.
    Inactive,
    /// Waiting for the next uplink slot.
    Sleeping,
    /// Sensor powering up; waiting for its first report.
    WakeDevice,
    Measuring,
    PowerDownDevice,
    Transmit,
    Final,
}

impl LoopState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            LoopState::Initial => "Initial",
            LoopState::Inactive => "Inactive",
            LoopState::Sleeping => "Sleeping",
            LoopState::WakeDevice => "WakeDevice",
            LoopState::Measuring => "Measuring",
            LoopState::PowerDownDevice => "PowerDownDevice",
            LoopState::Transmit => "Transmit",
            LoopState::Final => "Final",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a cycle ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    Delivered,
    /// The uplink could not be started or reported failure.
    Failed,
    /// The window did not fill in time; nothing was sent.
    Skipped,
}

/// Entry in the loop history.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopEvent {
    Entered(LoopState),
    Cycle(CycleOutcome),
}

impl fmt::Display for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopEvent::Entered(state) => write!(f, "enter {state}"),
            LoopEvent::Cycle(CycleOutcome::Delivered) => f.write_str("cycle: uplink sent"),
            LoopEvent::Cycle(CycleOutcome::Failed) => f.write_str("cycle: uplink failed"),
            LoopEvent::Cycle(CycleOutcome::Skipped) => f.write_str("cycle: batch invalid"),
        }
    }
}

/// Uplink scheduler around one [`Device`].
pub struct MeasurementLoop<H, U, C, L, B, const N: usize = WINDOW_SIZE> {
    device: Device<H, U, C>,
    uplink: L,
    board: B,
    config: LoopConfig,
    state: LoopState,
    entry_pending: bool,
    running: bool,
    active: bool,
    rq_active: bool,
    rq_inactive: bool,
    timer: Timer,
    timer_fired: bool,
    uplink_timer: IntervalTimer,
    tx_cycle_count: u32,
    window: SampleWindow<N>,
    report_arrived: bool,
    batch_valid: bool,
    tx_result: Option<bool>,
    tx_in_flight: bool,
    printed_sleeping: bool,
    last_payload: PayloadBuffer,
    history: TelemetryRecorder<LoopEvent, LOOP_HISTORY>,
}

impl<H, U, C, L, B, const N: usize> MeasurementLoop<H, U, C, L, B, N>
where
    H: Hal,
    U: Uart,
    C: Clock,
    L: Uplink,
    B: Board,
{
    pub fn new(device: Device<H, U, C>, uplink: L, board: B, config: LoopConfig) -> Self {
        let now = device.clock().now();
        Self {
            device,
            uplink,
            board,
            config,
            state: LoopState::Initial,
            entry_pending: true,
            running: false,
            active: false,
            rq_active: false,
            rq_inactive: false,
            timer: Timer::new(),
            timer_fired: false,
            uplink_timer: IntervalTimer::new(now, config.tx_cycle),
            tx_cycle_count: config.fast_cycle_count,
            window: SampleWindow::new(),
            report_arrived: false,
            batch_valid: false,
            tx_result: None,
            tx_in_flight: false,
            printed_sleeping: false,
            last_payload: PayloadBuffer::new(),
            history: TelemetryRecorder::new(),
        }
    }

    /// Starts the device and the loop. The loop begins in [`LoopState::Inactive`].
    pub fn begin(&mut self) {
        if self.running {
            return;
        }
        self.device.begin();
        self.running = true;
        self.state = LoopState::Initial;
        self.entry_pending = true;
        self.record(LoopEvent::Entered(LoopState::Initial));
        self.evaluate();
    }

    /// Stops the loop and runs the device to its final state.
    pub fn end(&mut self) {
        if !self.running {
            return;
        }
        self.state = LoopState::Final;
        self.entry_pending = true;
        self.record(LoopEvent::Entered(LoopState::Final));
        self.evaluate();
        self.device.end();
    }

    /// Starts (`true`) or stops (`false`) periodic measurement.
    pub fn request_active(&mut self, enable: bool) {
        if enable {
            self.rq_active = true;
        } else {
            self.rq_inactive = true;
        }
        self.evaluate();
    }

    /// Sets the uplink interval and how many cycles run before switching to
    /// the permanent interval. A `count` of zero keeps `secs` indefinitely.
    pub fn set_tx_cycle(&mut self, secs: u32, count: u32) {
        self.uplink_timer.set_interval(Milliseconds::from_secs(secs));
        self.tx_cycle_count = count;
        let now = self.now();
        if self.uplink_timer.peek_ticks(now) != 0 {
            self.evaluate();
        }
    }

    /// Current uplink interval in whole seconds.
    #[must_use]
    pub fn tx_cycle(&self) -> u32 {
        self.uplink_timer.interval().as_u32() / 1_000
    }

    /// Fast cycles left before the permanent interval applies.
    #[must_use]
    pub fn tx_cycle_count(&self) -> u32 {
        self.tx_cycle_count
    }

    /// Advances the interval countdown after a cycle.
    pub fn update_tx_cycle_time(&mut self) {
        match self.tx_cycle_count {
            0 => {}
            1 => {
                self.tx_cycle_count = 0;
                self.uplink_timer.set_interval(self.config.permanent_cycle);
                if self.device.hal().is_enabled(crate::device::DebugFlags::INFO) {
                    info!(
                        "tx cycle reset to {} s",
                        self.config.permanent_cycle.as_u32() / 1_000
                    );
                }
            }
            count => self.tx_cycle_count = count - 1,
        }
    }

    /// Drives the device, the timers, and the uplink. Call regularly.
    pub fn poll(&mut self) {
        if !self.running {
            return;
        }

        let sampling = self.state == LoopState::Measuring;
        let window = &mut self.window;
        let mut arrived = false;
        self.device.poll(&mut |report: &Measurements<u16>| {
            arrived = true;
            if sampling {
                window.push(report);
            }
        });

        if !self.active && !self.rq_active {
            return;
        }

        let now = self.now();
        let mut pending = arrived;
        if arrived {
            self.report_arrived = true;
        }
        if self.timer.poll(now) {
            self.timer_fired = true;
            pending = true;
        }
        if self.tx_in_flight {
            if let Some(ok) = self.uplink.poll_complete() {
                self.tx_in_flight = false;
                self.tx_result = Some(ok);
                pending = true;
            }
        }
        if self.uplink_timer.peek_ticks(now) != 0 {
            pending = true;
        }
        if pending {
            self.evaluate();
        }

        if self.state == LoopState::Sleeping {
            self.sleep();
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the most recent window filled before its deadline.
    #[must_use]
    pub fn batch_valid(&self) -> bool {
        self.batch_valid
    }

    /// Reports collected so far in the current window.
    #[must_use]
    pub fn samples_collected(&self) -> usize {
        self.window.len()
    }

    /// Last message handed to the uplink.
    #[must_use]
    pub fn last_payload(&self) -> &[u8] {
        &self.last_payload
    }

    /// Time until the next uplink slot.
    pub fn time_to_next_uplink(&mut self) -> Milliseconds {
        let now = self.now();
        self.uplink_timer.remaining(now)
    }

    #[must_use]
    pub fn history(&self) -> &TelemetryRecorder<LoopEvent, LOOP_HISTORY> {
        &self.history
    }

    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> &Device<H, U, C> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<H, U, C> {
        &mut self.device
    }

    #[must_use]
    pub fn uplink(&self) -> &L {
        &self.uplink
    }

    pub fn uplink_mut(&mut self) -> &mut L {
        &mut self.uplink
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    fn now(&self) -> Milliseconds {
        self.device.clock().now()
    }

    fn record(&mut self, event: LoopEvent) {
        let now = self.now();
        self.history.record(event, now);
    }

    fn arm_timer(&mut self, delay: Milliseconds) {
        self.timer_fired = false;
        let now = self.now();
        self.timer.arm(now, delay);
    }

    fn trace_enabled(&self) -> bool {
        self.device
            .hal()
            .is_enabled(crate::device::DebugFlags::TRACE)
    }

    fn evaluate(&mut self) {
        if !self.running {
            return;
        }

        loop {
            let entry = core::mem::take(&mut self.entry_pending);
            if entry && self.trace_enabled() {
                trace!("loop: enter {}", self.state.name());
            }

            match self.dispatch(self.state, entry) {
                Some(next) if next != self.state => {
                    self.state = next;
                    self.entry_pending = true;
                    self.record(LoopEvent::Entered(next));
                }
                _ => break,
            }

            if !self.running {
                break;
            }
        }
    }

    fn dispatch(&mut self, state: LoopState, entry: bool) -> Option<LoopState> {
        match state {
            LoopState::Initial => Some(LoopState::Inactive),

            LoopState::Inactive => {
                if entry {
                    self.device.request_off();
                }
                if self.rq_active {
                    self.rq_active = false;
                    self.rq_inactive = false;
                    self.active = true;
                    let now = self.now();
                    self.uplink_timer.retrigger(now);
                    Some(LoopState::WakeDevice)
                } else {
                    None
                }
            }

            LoopState::Sleeping => {
                if entry {
                    self.device.request_off();
                    self.printed_sleeping = false;
                }
                let now = self.now();
                if self.rq_inactive {
                    self.rq_inactive = false;
                    self.rq_active = false;
                    self.active = false;
                    Some(LoopState::Inactive)
                } else if self.uplink_timer.take_ready(now) {
                    Some(LoopState::WakeDevice)
                } else {
                    None
                }
            }

            LoopState::WakeDevice => {
                if entry {
                    self.device.event_wake();
                    self.arm_timer(self.config.wake_timeout);
                    self.window.clear();
                    self.report_arrived = false;
                    self.batch_valid = false;
                }
                if self.report_arrived {
                    self.report_arrived = false;
                    Some(LoopState::Measuring)
                } else if core::mem::take(&mut self.timer_fired) {
                    if self.device.hal().is_enabled(crate::device::DebugFlags::WARNING) {
                        warn!("no report from sensor before wake timeout");
                    }
                    Some(LoopState::PowerDownDevice)
                } else {
                    None
                }
            }

            LoopState::Measuring => {
                if entry {
                    self.window.clear();
                    let allowance = self.config.sample_allowance.as_u32();
                    let samples = u32::try_from(N).unwrap_or(u32::MAX);
                    self.arm_timer(Milliseconds::new(allowance.saturating_mul(samples)));
                }
                if self.window.is_full() {
                    self.batch_valid = true;
                    Some(LoopState::PowerDownDevice)
                } else if core::mem::take(&mut self.timer_fired) {
                    self.batch_valid = false;
                    if self.device.hal().is_enabled(crate::device::DebugFlags::WARNING) {
                        warn!(
                            "measuring timed out with {} of {} reports",
                            self.window.len(),
                            N
                        );
                    }
                    Some(LoopState::PowerDownDevice)
                } else {
                    None
                }
            }

            LoopState::PowerDownDevice => {
                if entry {
                    self.device.request_off();
                    self.arm_timer(self.config.power_down_settle);
                }
                core::mem::take(&mut self.timer_fired).then_some(LoopState::Transmit)
            }

            LoopState::Transmit => {
                if entry {
                    self.tx_result = None;
                    self.start_transmission();
                }
                let result = self.tx_result.take()?;
                let outcome = if !self.batch_valid {
                    CycleOutcome::Skipped
                } else if result {
                    CycleOutcome::Delivered
                } else {
                    CycleOutcome::Failed
                };
                self.record(LoopEvent::Cycle(outcome));
                self.update_tx_cycle_time();
                Some(LoopState::Sleeping)
            }

            LoopState::Final => {
                if entry {
                    self.running = false;
                    self.active = false;
                    self.timer.disarm();
                }
                None
            }
        }
    }

    fn start_transmission(&mut self) {
        if !self.batch_valid {
            // no uplink for an incomplete window
            self.tx_result = Some(false);
            return;
        }

        let reduced = match self.window.reduce() {
            Ok(reduced) => Some(reduced),
            Err(err) => {
                if self.device.hal().is_enabled(crate::device::DebugFlags::ERROR) {
                    error!("reduce failed: {}", err);
                }
                None
            }
        };

        let payload = UplinkPayload {
            format: self.config.format,
            vbat: self.board.vbat(),
            vsys: self.board.vsys(),
            vbus: self.board.vbus(),
            boot_count: self.board.boot_count(),
            environment: self.board.environment(),
            pm: reduced.map(|m| m.atm),
            dust: reduced.map(|m| m.dust),
            tvoc: self.board.tvoc(),
        };

        if let Err(err) = payload.encode_into(&mut self.last_payload) {
            if self.device.hal().is_enabled(crate::device::DebugFlags::ERROR) {
                error!("payload: {}", err);
            }
            self.tx_result = Some(false);
            return;
        }

        match self
            .uplink
            .start(self.config.port, &self.last_payload, self.config.confirmed)
        {
            Ok(()) => self.tx_in_flight = true,
            Err(err) => {
                if self.device.hal().is_enabled(crate::device::DebugFlags::ERROR) {
                    error!("uplink start failed: {:?}", err);
                }
                self.tx_result = Some(false);
            }
        }
    }

    fn sleep(&mut self) {
        let now = self.now();
        let remaining = self.uplink_timer.remaining(now);
        if remaining <= self.config.sleep_threshold {
            return;
        }

        if !self.printed_sleeping {
            self.printed_sleeping = true;
            if self.device.hal().is_enabled(crate::device::DebugFlags::INFO) {
                info!("sleeping for {} ms", remaining.as_u32());
            }
        }

        let deep = self.config.deep_sleep
            && remaining.as_u32() / 1_000 >= DEEP_SLEEP_MIN_SECS
            && self.device.state() == DeviceState::Off;
        if deep {
            self.device.end();
            self.board.deep_sleep(remaining);
            self.device.begin();
            self.evaluate();
        } else {
            self.board.light_sleep();
        }
    }
}
