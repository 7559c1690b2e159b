//! PMS7003 wire protocol.
//!
//! The sensor speaks 9600 8N1. Reports are 32-byte frames and host commands
//! are 7-byte frames; both start with the sync pair `0x42 0x4D` and end with a
//! big-endian 16-bit wrapping sum of every preceding byte.
//!
//! Report layout:
//!
//! | offset | content                                         |
//! |--------|-------------------------------------------------|
//! | 0..2   | sync `0x42 0x4D`                                |
//! | 2..4   | body length, always 28                          |
//! | 4..28  | 12 big-endian `u16` channels (cf1, atm, dust)   |
//! | 28..30 | reserved                                        |
//! | 30..32 | checksum of bytes 0..30                         |

use core::fmt;

use crate::measurement::{CHANNEL_COUNT, Measurements};

pub const SYNC1: u8 = 0x42;
pub const SYNC2: u8 = 0x4D;

/// Length of a sensor report frame.
pub const FRAME_LEN: usize = 32;
/// Value of the length field in every report frame.
pub const FRAME_BODY_LEN: u16 = (FRAME_LEN - 4) as u16;
/// Length of a host command frame.
pub const COMMAND_LEN: usize = 7;

const CHANNELS_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = FRAME_LEN - 2;

/// Command opcodes understood by the sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Request one report while in passive mode.
    ReadPassive = 0xE2,
    /// Select active (data = 1) or passive (data = 0) reporting.
    ChangeMode = 0xE1,
    /// Select awake (data = 1) or sleep (data = 0) run mode.
    RunMode = 0xE4,
}

impl Opcode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xE2 => Some(Self::ReadPassive),
            0xE1 => Some(Self::ChangeMode),
            0xE4 => Some(Self::RunMode),
            _ => None,
        }
    }
}

/// Typed host command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    ReadPassive,
    /// `true` selects active reporting, `false` passive.
    SetActive(bool),
    /// `true` wakes the fan and laser, `false` puts them to sleep.
    SetAwake(bool),
}

impl Command {
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Command::ReadPassive => Opcode::ReadPassive,
            Command::SetActive(_) => Opcode::ChangeMode,
            Command::SetAwake(_) => Opcode::RunMode,
        }
    }

    #[must_use]
    pub const fn data(self) -> u16 {
        match self {
            Command::ReadPassive => 0,
            Command::SetActive(flag) | Command::SetAwake(flag) => flag as u16,
        }
    }

    #[must_use]
    pub fn encode(self) -> [u8; COMMAND_LEN] {
        encode_command(self.opcode(), self.data())
    }

    /// Decodes a command frame, returning `None` on bad sync, opcode, or checksum.
    #[must_use]
    pub fn decode(frame: &[u8; COMMAND_LEN]) -> Option<Self> {
        if frame[0] != SYNC1 || frame[1] != SYNC2 {
            return None;
        }
        if checksum(&frame[..5]) != read_be(frame, 5) {
            return None;
        }
        let data = read_be(frame, 3);
        match Opcode::from_u8(frame[2])? {
            Opcode::ReadPassive => Some(Command::ReadPassive),
            Opcode::ChangeMode => Some(Command::SetActive(data != 0)),
            Opcode::RunMode => Some(Command::SetAwake(data != 0)),
        }
    }
}

/// 16-bit wrapping sum of `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

/// Builds a 7-byte command frame.
#[must_use]
pub fn encode_command(opcode: Opcode, data: u16) -> [u8; COMMAND_LEN] {
    let mut frame = [0u8; COMMAND_LEN];
    frame[0] = SYNC1;
    frame[1] = SYNC2;
    frame[2] = opcode as u8;
    frame[3..5].copy_from_slice(&data.to_be_bytes());
    let sum = checksum(&frame[..5]);
    frame[5..].copy_from_slice(&sum.to_be_bytes());
    frame
}

/// Builds a 32-byte report frame carrying `report`.
#[must_use]
pub fn encode_frame(report: &Measurements<u16>) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = SYNC1;
    frame[1] = SYNC2;
    frame[2..4].copy_from_slice(&FRAME_BODY_LEN.to_be_bytes());
    for (index, value) in report.channels().iter().enumerate() {
        let at = CHANNELS_OFFSET + index * 2;
        frame[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }
    let sum = checksum(&frame[..CHECKSUM_OFFSET]);
    frame[CHECKSUM_OFFSET..].copy_from_slice(&sum.to_be_bytes());
    frame
}

/// Returns `true` when the trailing checksum matches the frame contents.
#[must_use]
pub fn verify(frame: &[u8; FRAME_LEN]) -> bool {
    checksum(&frame[..CHECKSUM_OFFSET]) == read_be(frame, CHECKSUM_OFFSET)
}

fn decode_channels(frame: &[u8; FRAME_LEN]) -> Measurements<u16> {
    let mut channels = [0u16; CHANNEL_COUNT];
    for (index, slot) in channels.iter_mut().enumerate() {
        *slot = read_be(frame, CHANNELS_OFFSET + index * 2);
    }
    Measurements::from_channels(channels)
}

fn read_be(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

/// Byte that must appear at `offset`, if that position is constrained.
const fn expected_at(offset: usize) -> Option<u8> {
    match offset {
        0 => Some(SYNC1),
        1 => Some(SYNC2),
        // high byte of the body length
        2 => Some(0),
        _ => None,
    }
}

/// Receive-side counters. They only ever grow.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStats {
    /// Bytes read from the transport.
    pub char_in: u32,
    /// Bytes thrown away while hunting for a frame start.
    pub char_drops: u32,
    /// Partial frames abandoned on a sync mismatch.
    pub msg_drops: u32,
    pub bad_checksum: u32,
    pub good_msgs: u32,
}

impl fmt::Display for RxStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BYTES: In={} Drops={}  MSG: Drops={} CsErr={} Good={}",
            self.char_in, self.char_drops, self.msg_drops, self.bad_checksum, self.good_msgs
        )
    }
}

/// Result of feeding one byte to [`FrameParser::push`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseOutcome {
    /// Byte accepted; the frame is not complete yet.
    Pending,
    /// Byte did not fit the frame header; the partial frame was dropped.
    Discarded { byte: u8, dropped: usize },
    /// A full frame arrived with a checksum mismatch.
    BadChecksum,
    Frame(Measurements<u16>),
}

/// Byte-at-a-time report parser with header resynchronization.
///
/// A byte that breaks the expected header is dropped together with the partial
/// frame; it is not retried as a new frame start.
#[derive(Clone, Debug)]
pub struct FrameParser {
    buffer: [u8; FRAME_LEN],
    offset: usize,
    stats: RxStats,
}

impl FrameParser {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; FRAME_LEN],
            offset: 0,
            stats: RxStats {
                char_in: 0,
                char_drops: 0,
                msg_drops: 0,
                bad_checksum: 0,
                good_msgs: 0,
            },
        }
    }

    /// Abandons any partial frame without touching the counters.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn stats(&self) -> RxStats {
        self.stats
    }

    pub fn push(&mut self, byte: u8) -> ParseOutcome {
        self.stats.char_in = self.stats.char_in.wrapping_add(1);
        let offset = self.offset;

        if let Some(expected) = expected_at(offset) {
            if byte != expected {
                self.offset = 0;
                self.stats.char_drops = self.stats.char_drops.wrapping_add(offset as u32 + 1);
                if offset > 0 {
                    self.stats.msg_drops = self.stats.msg_drops.wrapping_add(1);
                }
                return ParseOutcome::Discarded {
                    byte,
                    dropped: offset + 1,
                };
            }
        }

        self.buffer[offset] = byte;
        if offset + 1 < FRAME_LEN {
            self.offset = offset + 1;
            return ParseOutcome::Pending;
        }

        self.offset = 0;
        if verify(&self.buffer) {
            self.stats.good_msgs = self.stats.good_msgs.wrapping_add(1);
            ParseOutcome::Frame(decode_channels(&self.buffer))
        } else {
            self.stats.bad_checksum = self.stats.bad_checksum.wrapping_add(1);
            ParseOutcome::BadChecksum
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
