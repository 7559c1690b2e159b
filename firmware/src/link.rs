//! Byte queues between the sensor UART task and the device state machine.
//!
//! The state machine polls synchronously while the UART driver is async, so
//! [`ChannelUart`] implements the core [`Uart`] trait over a pair of bounded
//! channels that the UART task drains and fills.

use embassy_sync::channel::Channel;
use pms_core::device::Uart;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type LinkMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type LinkMutex = NoopRawMutex;

/// Bytes buffered in each direction; two report frames fit the receive side.
pub const LINK_QUEUE_DEPTH: usize = 64;

pub type ByteChannel = Channel<LinkMutex, u8, LINK_QUEUE_DEPTH>;

/// Shared state of the sensor serial link.
pub struct SensorLink {
    pub to_sensor: ByteChannel,
    pub from_sensor: ByteChannel,
    open: AtomicBool,
    baud: AtomicU32,
}

impl SensorLink {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            to_sensor: Channel::new(),
            from_sensor: Channel::new(),
            open: AtomicBool::new(false),
            baud: AtomicU32::new(0),
        }
    }

    /// Whether the state machine currently has the port open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn baud(&self) -> u32 {
        self.baud.load(Ordering::Relaxed)
    }

    /// Queues a byte received from the sensor; dropped while the port is closed
    /// or the queue is full. Returns whether it was kept.
    pub fn deliver(&self, byte: u8) -> bool {
        self.is_open() && self.from_sensor.try_send(byte).is_ok()
    }
}

impl Default for SensorLink {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Uart`] handle used by the device state machine.
#[derive(Clone, Copy)]
pub struct ChannelUart<'a> {
    link: &'a SensorLink,
}

impl<'a> ChannelUart<'a> {
    #[must_use]
    pub const fn new(link: &'a SensorLink) -> Self {
        Self { link }
    }
}

impl Uart for ChannelUart<'_> {
    fn open(&mut self, baud: u32) {
        self.link.baud.store(baud, Ordering::Relaxed);
        self.link.from_sensor.clear();
        self.link.open.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        self.link.open.store(false, Ordering::Release);
        self.link.from_sensor.clear();
    }

    fn bytes_available(&self) -> usize {
        self.link.from_sensor.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.link.from_sensor.try_receive().ok()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .take_while(|byte| self.link.to_sensor.try_send(**byte).is_ok())
            .count()
    }

    fn write_headroom(&self) -> usize {
        self.link.to_sensor.free_capacity()
    }
}
