//! Uplink message layout and the radio seam.
//!
//! A message starts with a format byte and a flags byte; every group whose flag
//! is set follows in flag order, each value big-endian.

use core::fmt;

use heapless::Vec;

use crate::measurement::{DustBins, PmBins};

/// Application port used for measurement uplinks.
pub const UPLINK_PORT: u8 = 1;

/// Uplink buffer size. A format 0x20 message with every group takes 35 bytes.
pub const PAYLOAD_CAPACITY: usize = 36;

/// Encoded message buffer.
pub type PayloadBuffer = Vec<u8, PAYLOAD_CAPACITY>;

/// Message layout selector carried in byte 0.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PayloadFormat {
    /// Environment group carries barometric pressure.
    WithPressure = 0x20,
    /// Environment group is temperature and humidity only.
    #[default]
    Standard = 0x21,
}

impl PayloadFormat {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Presence bits carried in byte 1.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadFlags(u8);

impl PayloadFlags {
    pub const VBAT: Self = Self(1 << 0);
    pub const VSYS: Self = Self(1 << 1);
    pub const VBUS: Self = Self(1 << 2);
    pub const BOOT: Self = Self(1 << 3);
    pub const ENVIRONMENT: Self = Self(1 << 4);
    pub const PM: Self = Self(1 << 5);
    pub const DUST: Self = Self(1 << 6);
    pub const TVOC: Self = Self(1 << 7);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Temperature, pressure and relative humidity.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Environment {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Hectopascal; only sent in [`PayloadFormat::WithPressure`] messages.
    pub pressure: f32,
    /// Percent, `0.0..=100.0`.
    pub humidity: f32,
}

/// Values to send in one uplink. Absent groups are left out of the message.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UplinkPayload {
    pub format: PayloadFormat,
    /// Volts.
    pub vbat: Option<f32>,
    pub vsys: Option<f32>,
    pub vbus: Option<f32>,
    pub boot_count: Option<u32>,
    pub environment: Option<Environment>,
    /// Atmospheric mass concentrations as fractions of full scale.
    pub pm: Option<PmBins<f32>>,
    /// Particle counts as fractions of full scale.
    pub dust: Option<DustBins<f32>>,
    /// Raw VOC index.
    pub tvoc: Option<u16>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadError {
    BufferFull,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::BufferFull => f.write_str("uplink buffer full"),
        }
    }
}

/// Scales and rounds to the nearest `i16`, saturating at the ends.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode16s(value: f32) -> i16 {
    let rounded = if value >= 0.0 { value + 0.5 } else { value - 0.5 };
    rounded as i16
}

/// Rounds to the nearest `u16`, saturating at the ends.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode16u(value: f32) -> u16 {
    (value + 0.5) as u16
}

/// Maps a `0.0..=1.0` fraction onto the full `u16` range.
#[must_use]
pub fn encode_fraction(value: f32) -> u16 {
    encode16u(value * 65_535.0)
}

impl UplinkPayload {
    #[must_use]
    pub fn flags(&self) -> PayloadFlags {
        let mut flags = PayloadFlags::default();
        let groups = [
            (self.vbat.is_some(), PayloadFlags::VBAT),
            (self.vsys.is_some(), PayloadFlags::VSYS),
            (self.vbus.is_some(), PayloadFlags::VBUS),
            (self.boot_count.is_some(), PayloadFlags::BOOT),
            (self.environment.is_some(), PayloadFlags::ENVIRONMENT),
            (self.pm.is_some(), PayloadFlags::PM),
            (self.dust.is_some(), PayloadFlags::DUST),
            (self.tvoc.is_some(), PayloadFlags::TVOC),
        ];
        for (present, flag) in groups {
            if present {
                flags.insert(flag);
            }
        }
        flags
    }

    /// Serializes the message into `out`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::BufferFull`] if `out` cannot hold the message.
    pub fn encode_into<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), PayloadError> {
        out.clear();
        let mut writer = Writer { out };

        writer.put(self.format.tag())?;
        writer.put(self.flags().bits())?;

        for volts in [self.vbat, self.vsys, self.vbus].into_iter().flatten() {
            writer.put_i16(encode16s(volts * 4096.0))?;
        }
        if let Some(boot) = self.boot_count {
            writer.put(boot.to_le_bytes()[0])?;
        }
        if let Some(env) = self.environment {
            writer.put_i16(encode16s(env.temperature * 256.0))?;
            if self.format == PayloadFormat::WithPressure {
                writer.put_u16(encode16u(env.pressure * 25.0))?;
            }
            writer.put_u16(encode16u(env.humidity * 65_535.0 / 100.0))?;
        }
        if let Some(pm) = self.pm {
            for value in [pm.m1p0, pm.m2p5, pm.m10] {
                writer.put_u16(encode_fraction(value))?;
            }
        }
        if let Some(dust) = self.dust {
            for value in [
                dust.m0p3, dust.m0p5, dust.m1p0, dust.m2p5, dust.m5, dust.m10,
            ] {
                writer.put_u16(encode_fraction(value))?;
            }
        }
        if let Some(tvoc) = self.tvoc {
            writer.put_u16(tvoc)?;
        }

        Ok(())
    }

    /// Serializes the message into a fresh [`PayloadBuffer`].
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::BufferFull`] if the message exceeds [`PAYLOAD_CAPACITY`].
    pub fn encode(&self) -> Result<PayloadBuffer, PayloadError> {
        let mut out = PayloadBuffer::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

struct Writer<'a, const N: usize> {
    out: &'a mut Vec<u8, N>,
}

impl<const N: usize> Writer<'_, N> {
    fn put(&mut self, byte: u8) -> Result<(), PayloadError> {
        self.out.push(byte).map_err(|_| PayloadError::BufferFull)
    }

    fn put_u16(&mut self, value: u16) -> Result<(), PayloadError> {
        self.out
            .extend_from_slice(&value.to_be_bytes())
            .map_err(|_| PayloadError::BufferFull)
    }

    fn put_i16(&mut self, value: i16) -> Result<(), PayloadError> {
        self.put_u16(u16::from_be_bytes(value.to_be_bytes()))
    }
}

/// Bound on [`Uplink::Error`]: the error must be printable by whichever log
/// backend the crate is built with.
#[cfg(feature = "defmt")]
pub trait UplinkError: fmt::Debug + defmt::Format {}

#[cfg(feature = "defmt")]
impl<T: fmt::Debug + defmt::Format> UplinkError for T {}

/// Bound on [`Uplink::Error`]: the error must be printable by whichever log
/// backend the crate is built with.
#[cfg(not(feature = "defmt"))]
pub trait UplinkError: fmt::Debug {}

#[cfg(not(feature = "defmt"))]
impl<T: fmt::Debug> UplinkError for T {}

/// Radio transmit path.
///
/// `start` launches a transmission without blocking; `poll_complete` reports
/// its outcome once, as `Some(true)` on success and `Some(false)` on failure.
pub trait Uplink {
    type Error: UplinkError;

    /// Launches a transmission of `payload` on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error when the transmission could not be started.
    fn start(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), Self::Error>;

    /// Returns the outcome of the in-flight transmission once it is known.
    fn poll_complete(&mut self) -> Option<bool>;
}

impl<U: Uplink + ?Sized> Uplink for &mut U {
    type Error = U::Error;

    fn start(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), Self::Error> {
        (**self).start(port, payload, confirmed)
    }

    fn poll_complete(&mut self) -> Option<bool> {
        (**self).poll_complete()
    }
}
