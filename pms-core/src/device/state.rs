//! States, events, and requests of the device state machine.

use core::fmt;

/// Every state of the device state machine.
///
/// The first six are "outer" states that sequence power and reset; the rest
/// are operating states in either active (`Normal*`) or passive reporting.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Not started.
    Initial,
    /// HAL bring-up with the rail forced off.
    InitialSetup,
    /// Rail off, waiting for a wake event.
    Off,
    /// Rail switched on, waiting for it to settle.
    RequestPowerOn,
    /// Reset asserted for the minimum pulse width.
    Reset,
    /// Rail switched off, waiting for it to settle.
    RequestPowerDown,
    /// Active reporting; the sensor streams a frame about once a second.
    Normal,
    NormalSendCmd,
    NormalHwSleep,
    NormalSleepCmd,
    NormalSwSleep,
    NormalWakeCmd,
    PassiveSendCmd,
    /// Passive reporting; frames only arrive on request.
    Passive,
    PassiveHwSleep,
    PassiveMeasureCmd,
    PassiveSleepCmd,
    PassiveSwSleep,
    PassiveWakeCmd,
    /// Stopped; `begin` restarts the machine.
    Final,
}

impl DeviceState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DeviceState::Initial => "Initial",
            DeviceState::InitialSetup => "InitialSetup",
            DeviceState::Off => "Off",
            DeviceState::RequestPowerOn => "RequestPowerOn",
            DeviceState::Reset => "Reset",
            DeviceState::RequestPowerDown => "RequestPowerDown",
            DeviceState::Normal => "Normal",
            DeviceState::NormalSendCmd => "NormalSendCmd",
            DeviceState::NormalHwSleep => "NormalHwSleep",
            DeviceState::NormalSleepCmd => "NormalSleepCmd",
            DeviceState::NormalSwSleep => "NormalSwSleep",
            DeviceState::NormalWakeCmd => "NormalWakeCmd",
            DeviceState::PassiveSendCmd => "PassiveSendCmd",
            DeviceState::Passive => "Passive",
            DeviceState::PassiveHwSleep => "PassiveHwSleep",
            DeviceState::PassiveMeasureCmd => "PassiveMeasureCmd",
            DeviceState::PassiveSleepCmd => "PassiveSleepCmd",
            DeviceState::PassiveSwSleep => "PassiveSwSleep",
            DeviceState::PassiveWakeCmd => "PassiveWakeCmd",
            DeviceState::Final => "Final",
        }
    }

    /// Returns `true` for the power and reset sequencing states.
    #[must_use]
    pub const fn is_outer(self) -> bool {
        matches!(
            self,
            DeviceState::Initial
                | DeviceState::InitialSetup
                | DeviceState::Off
                | DeviceState::RequestPowerOn
                | DeviceState::Reset
                | DeviceState::RequestPowerDown
                | DeviceState::Final
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One-shot notifications consumed by the state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Event {
    Timer,
    TxDone,
    NewData,
    Wake,
}

impl Event {
    const fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Set of pending [`Event`]s with test-and-clear access.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EventSet(u8);

impl EventSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, event: Event) {
        self.0 |= event.mask();
    }

    pub fn clear(&mut self, event: Event) {
        self.0 &= !event.mask();
    }

    /// Returns whether `event` was pending and clears it.
    pub fn take(&mut self, event: Event) -> bool {
        let pending = self.contains(event);
        self.clear(event);
        pending
    }

    #[must_use]
    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.mask() != 0
    }

    pub fn clear_all(&mut self) {
        self.0 = 0;
    }
}

/// Operations requested of the device, in priority order (first is highest).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Request {
    Off,
    Reset,
    /// Sleep by pulling the mode line low.
    HwSleep,
    /// Sleep by command.
    Sleep,
    Passive,
    Normal,
    Measure,
}

impl Request {
    pub const ALL: [Request; 7] = [
        Request::Off,
        Request::Reset,
        Request::HwSleep,
        Request::Sleep,
        Request::Passive,
        Request::Normal,
        Request::Measure,
    ];

    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Request::Off => "off",
            Request::Reset => "reset",
            Request::HwSleep => "hwsleep",
            Request::Sleep => "sleep",
            Request::Passive => "passive",
            Request::Normal => "normal",
            Request::Measure => "measure",
        }
    }
}

/// Set of pending [`Request`]s.
///
/// A request is honored only when no higher-priority request is pending, and
/// honoring any request discards every other pending request.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestSet(u8);

impl RequestSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn of(requests: &[Request]) -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < requests.len() {
            bits |= requests[index].mask();
            index += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, request: Request) -> bool {
        self.0 & request.mask() != 0
    }

    pub fn insert(&mut self, request: Request) {
        self.0 |= request.mask();
    }

    /// Drops every pending request that is not in `allowed`.
    pub fn retain(&mut self, allowed: RequestSet) {
        self.0 &= allowed.0;
    }

    /// Honors `request` if it is pending and nothing outranks it.
    ///
    /// On success the whole set is cleared.
    pub fn take(&mut self, request: Request) -> bool {
        let mask = request.mask();
        if self.0 & (mask - 1) != 0 {
            return false;
        }
        if self.0 & mask != 0 {
            self.0 = 0;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterates over pending requests from highest to lowest priority.
    pub fn iter(self) -> impl Iterator<Item = Request> {
        Request::ALL
            .into_iter()
            .filter(move |request| self.contains(*request))
    }
}

impl fmt::Display for RequestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for (index, request) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            f.write_str(request.name())?;
        }
        Ok(())
    }
}
