use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use pms_core::console::{CommandError, CommandExecutor};
use pms_core::device::{DebugFlags, Device, DeviceConfig, PinHal, RailTiming};
use pms_core::orchestrator::{LoopConfig, MeasurementLoop};

use crate::sim::{HexUplink, SimBoard, SimClock, SimPins, SimSensor, SimUart};

type EmulatedLoop = MeasurementLoop<PinHal<SimPins>, SimUart, SimClock, HexUplink, SimBoard>;

/// Commands handled by the emulator itself rather than the device console.
pub const LOCAL_TOPICS: &[(&str, &str)] = &[
    ("advance", "advance <ms>    - move simulated time forward"),
    ("sensor", "sensor          - show the simulated sensor's state"),
    ("history", "history         - list recent device and loop transitions"),
];

/// Startup options taken from the command line.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub deep_sleep: bool,
    pub start_active: bool,
    pub seed: u32,
    pub transcript: Option<String>,
}

pub struct Session {
    executor: CommandExecutor<EmulatedLoop>,
    clock: SimClock,
    sensor: SimSensor,
    uplink: HexUplink,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let clock = SimClock::new();
        let sensor = SimSensor::new(options.seed);
        let uplink = HexUplink::default();
        let hal = PinHal::new(
            sensor.pins(),
            RailTiming::DEFAULT,
            DebugFlags::default() | DebugFlags::INFO,
        );
        let device = Device::new(hal, sensor.uart(), clock.clone(), DeviceConfig::DEFAULT);
        let config = LoopConfig {
            deep_sleep: options.deep_sleep,
            ..LoopConfig::DEFAULT
        };

        let mut measurement =
            MeasurementLoop::new(device, uplink.clone(), SimBoard::new(clock.clone()), config);
        measurement.begin();
        if options.start_active {
            measurement.request_active(true);
        }

        Ok(Self {
            executor: CommandExecutor::new(measurement),
            clock,
            sensor,
            uplink,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    /// Steps the sensor model and the measurement loop once; returns any
    /// uplink lines produced.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let lines = self.step();
        if !lines.is_empty() {
            let elapsed = self.started_at.elapsed();
            self.record_output(elapsed, &lines)?;
        }
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut lines = match self.handle_local(trimmed) {
            Some(lines) => lines,
            None => match self.executor.execute(trimmed) {
                Ok(outcome) => outcome.to_string().lines().map(str::to_string).collect(),
                Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
                Err(err) => vec![format!("ERR {err}")],
            },
        };

        if trimmed.eq_ignore_ascii_case("help") {
            lines.extend(LOCAL_TOPICS.iter().map(|(_, usage)| (*usage).to_string()));
        }

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn step(&mut self) -> Vec<String> {
        self.sensor.tick(self.clock.millis());
        self.executor.target_mut().poll();
        self.uplink.drain_output()
    }

    fn handle_local(&mut self, line: &str) -> Option<Vec<String>> {
        let mut words = line.split_whitespace();
        let keyword = words.next()?;

        if keyword.eq_ignore_ascii_case("advance") {
            let reply = match words.next().map(str::parse::<u64>) {
                Some(Ok(millis)) => {
                    self.clock.advance(millis);
                    let mut lines = vec![format!("time is now {} ms", self.clock.millis())];
                    lines.extend(self.step());
                    lines
                }
                Some(Err(err)) => vec![format!("ERR syntax {err}")],
                None => vec!["ERR syntax expected milliseconds".to_string()],
            };
            return Some(reply);
        }

        if keyword.eq_ignore_ascii_case("sensor") {
            return Some(vec![self.sensor.describe()]);
        }

        if keyword.eq_ignore_ascii_case("history") {
            let measurement = self.executor.target();
            let mut lines = vec!["device:".to_string()];
            lines.extend(
                measurement
                    .device()
                    .history()
                    .oldest_first()
                    .map(|record| format!("  {record}")),
            );
            lines.push("loop:".to_string());
            lines.extend(
                measurement
                    .history()
                    .oldest_first()
                    .map(|record| format!("  {record}")),
            );
            return Some(lines);
        }

        None
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &str) -> io::Result<Self> {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "PMS7003 emulator transcript")?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[{:>8.3}s] {} {}",
            elapsed.as_secs_f64(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(&SessionOptions::default()).expect("session without transcript")
    }

    #[test]
    fn console_commands_reach_the_loop() {
        let mut session = session();
        assert_eq!(
            session.handle_command("run").expect("run"),
            vec!["run measurement loop".to_string()]
        );
        let status = session.handle_command("status").expect("status");
        assert!(status[1].starts_with("loop: WakeDevice active"), "{status:?}");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = session();
        let lines = session.handle_command("interval").expect("reply");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR syntax"), "{lines:?}");

        let lines = session.handle_command("advance soon").expect("reply");
        assert!(lines[0].starts_with("ERR syntax"), "{lines:?}");
    }

    #[test]
    fn help_lists_local_commands() {
        let mut session = session();
        let lines = session.handle_command("help").expect("help");
        assert!(lines.iter().any(|line| line.starts_with("advance")));
        assert!(lines.iter().any(|line| line.starts_with("interval")));
    }

    #[test]
    fn advancing_time_completes_a_cycle() {
        let mut session = session();
        session.handle_command("run").expect("run");

        let mut uplinks = Vec::new();
        for _ in 0..1_000 {
            let lines = session.handle_command("advance 100").expect("advance");
            uplinks.extend(
                lines
                    .into_iter()
                    .filter(|line| line.starts_with("uplink #")),
            );
            if !uplinks.is_empty() {
                break;
            }
        }

        assert_eq!(uplinks.len(), 1, "no uplink after simulated cycle");
        assert!(uplinks[0].contains("port=1"), "{uplinks:?}");
        let stats = session.handle_command("stats").expect("stats");
        assert!(stats[0].ends_with("Good=11"), "{stats:?}");
    }
}
