//! Line-oriented operator console carried over USB CDC.
//!
//! The USB task forwards raw packets; [`ConsoleSession`] assembles them into
//! lines, runs each through the shared [`CommandExecutor`], and writes the
//! reply into a caller-supplied buffer.

use core::fmt::{self, Write};
use core::str;

use embassy_sync::channel::Channel;
use heapless::Vec;
use pms_core::console::{CommandError, CommandExecutor, ConsoleTarget};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type ConsoleMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ConsoleMutex = NoopRawMutex;

/// Maximum number of bytes accepted on one line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Largest packet exchanged with the USB task.
pub const CONSOLE_FRAME_SIZE: usize = 64;

pub const CONSOLE_QUEUE_DEPTH: usize = 4;

/// Room for the longest reply (`help`).
pub const REPLY_CAPACITY: usize = 768;

pub type ConsoleFrame = Vec<u8, CONSOLE_FRAME_SIZE>;

pub type ConsoleChannel = Channel<ConsoleMutex, ConsoleFrame, CONSOLE_QUEUE_DEPTH>;

const PROMPT: &str = "> ";

/// Errors surfaced while feeding the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum ConsoleError {
    /// Input exceeded [`MAX_LINE_LEN`]; the partial line was discarded.
    LineOverflow,
    InvalidUtf8,
    /// The reply did not fit the output buffer.
    ReplyOverflow,
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::LineOverflow => f.write_str("line too long"),
            ConsoleError::InvalidUtf8 => f.write_str("line is not valid UTF-8"),
            ConsoleError::ReplyOverflow => f.write_str("reply truncated"),
        }
    }
}

impl From<fmt::Error> for ConsoleError {
    fn from(_: fmt::Error) -> Self {
        Self::ReplyOverflow
    }
}

/// Console state for one CDC link.
pub struct ConsoleSession<T> {
    executor: CommandExecutor<T>,
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl<T: ConsoleTarget> ConsoleSession<T> {
    #[must_use]
    pub const fn new(target: T) -> Self {
        Self {
            executor: CommandExecutor::new(target),
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    pub fn target_mut(&mut self) -> &mut T {
        self.executor.target_mut()
    }

    /// Drops any partial line, e.g. when the host reconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Feeds one byte. A line terminator runs the buffered command and writes
    /// its reply (followed by a prompt) to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when the line is too long or not UTF-8, or the
    /// reply does not fit `out`.
    pub fn ingest<W: Write>(&mut self, byte: u8, out: &mut W) -> Result<(), ConsoleError> {
        match byte {
            b'\r' | b'\n' => {
                if core::mem::take(&mut self.overflowed) {
                    self.buffer.clear();
                    out.write_str(PROMPT)?;
                    return Err(ConsoleError::LineOverflow);
                }
                self.process_line(out)
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(())
            }
            value => {
                if self.overflowed {
                    return Ok(());
                }
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                    return Err(ConsoleError::LineOverflow);
                }
                Ok(())
            }
        }
    }

    fn process_line<W: Write>(&mut self, out: &mut W) -> Result<(), ConsoleError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let result = match str::from_utf8(self.buffer.as_slice()) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    Ok(())
                } else {
                    write_reply(&mut self.executor, line, out)
                }
            }
            Err(_) => Err(ConsoleError::InvalidUtf8),
        };
        self.buffer.clear();
        result
    }
}

fn write_reply<T: ConsoleTarget, W: Write>(
    executor: &mut CommandExecutor<T>,
    line: &str,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let mut out = CrLf(out);
    match executor.execute(line) {
        Ok(outcome) => writeln!(out, "{outcome}")?,
        Err(CommandError::Parse(err)) => writeln!(out, "ERR syntax {err}")?,
        Err(err) => writeln!(out, "ERR {err}")?,
    }
    out.write_str(PROMPT)?;
    Ok(())
}

/// Rewrites bare line feeds as CRLF for terminal emulators.
struct CrLf<'a, W>(&'a mut W);

impl<W: Write> Write for CrLf<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut parts = s.split('\n');
        if let Some(first) = parts.next() {
            self.0.write_str(first)?;
        }
        for part in parts {
            self.0.write_str("\r\n")?;
            self.0.write_str(part)?;
        }
        Ok(())
    }
}

/// Splits `text` into packets for the USB task.
pub fn frames(text: &str) -> impl Iterator<Item = ConsoleFrame> + '_ {
    text.as_bytes().chunks(CONSOLE_FRAME_SIZE).map(|chunk| {
        let mut frame = ConsoleFrame::new();
        // chunks never exceed the frame capacity
        let _ = frame.extend_from_slice(chunk);
        frame
    })
}
