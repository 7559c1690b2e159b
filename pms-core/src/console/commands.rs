//! Console command dispatcher.
//!
//! Parsed commands are applied to a [`ConsoleTarget`]; the result is a
//! [`CommandOutcome`] that renders the operator-facing reply via `Display`.

use core::fmt;

use crate::codec::RxStats;
use crate::device::{DebugFlags, DeviceState, Hal, RequestSet, Uart};
use crate::orchestrator::{Board, LoopState, MeasurementLoop};
use crate::timer::{Clock, Milliseconds};
use crate::uplink::Uplink;

use super::grammar::{self, COMMANDS, Command, CommandInfo, PmsAction};

/// Point-in-time view used by the `status` command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub device: DeviceState,
    pub pending: RequestSet,
    pub measurement: LoopState,
    pub active: bool,
    pub tx_cycle_secs: u32,
    pub tx_cycle_count: u32,
    pub next_uplink: Milliseconds,
    pub samples: usize,
    pub batch_valid: bool,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device: {} (pending {})", self.device, self.pending)?;
        writeln!(
            f,
            "loop: {} {} samples={} valid={}",
            self.measurement,
            if self.active { "active" } else { "inactive" },
            self.samples,
            self.batch_valid
        )?;
        write!(
            f,
            "interval: {} s, {} fast cycles left, next uplink in {}",
            self.tx_cycle_secs, self.tx_cycle_count, self.next_uplink
        )
    }
}

/// Operations the console can perform.
pub trait ConsoleTarget {
    fn set_active(&mut self, enable: bool);

    fn rx_stats(&self) -> RxStats;

    fn debug_flags(&self) -> DebugFlags;

    fn set_debug_flags(&mut self, flags: DebugFlags);

    fn device_action(&mut self, action: PmsAction);

    fn set_tx_cycle(&mut self, secs: u32, count: u32);

    fn status(&mut self) -> StatusSnapshot;
}

impl<H, U, C, L, B, const N: usize> ConsoleTarget for MeasurementLoop<H, U, C, L, B, N>
where
    H: Hal,
    U: Uart,
    C: Clock,
    L: Uplink,
    B: Board,
{
    fn set_active(&mut self, enable: bool) {
        self.request_active(enable);
    }

    fn rx_stats(&self) -> RxStats {
        self.device().rx_stats()
    }

    fn debug_flags(&self) -> DebugFlags {
        self.device().hal().debug_flags()
    }

    fn set_debug_flags(&mut self, flags: DebugFlags) {
        self.device_mut().hal_mut().set_debug_flags(flags);
    }

    fn device_action(&mut self, action: PmsAction) {
        let device = self.device_mut();
        match action {
            PmsAction::Off => device.request_off(),
            PmsAction::Reset => device.request_reset(),
            PmsAction::HwSleep => device.request_hw_sleep(),
            PmsAction::Sleep => device.request_sleep(),
            PmsAction::Passive => device.request_passive(),
            PmsAction::Normal => device.request_normal(),
            PmsAction::Measure => device.request_measure(),
            PmsAction::Wake => device.event_wake(),
        }
    }

    fn set_tx_cycle(&mut self, secs: u32, count: u32) {
        MeasurementLoop::set_tx_cycle(self, secs, count);
    }

    fn status(&mut self) -> StatusSnapshot {
        StatusSnapshot {
            device: self.device().state(),
            pending: self.device().pending_requests(),
            measurement: self.state(),
            active: self.is_active(),
            tx_cycle_secs: self.tx_cycle(),
            tx_cycle_count: self.tx_cycle_count(),
            next_uplink: self.time_to_next_uplink(),
            samples: self.samples_collected(),
            batch_valid: self.batch_valid(),
        }
    }
}

/// Successful command results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Loop { active: bool },
    Stats(RxStats),
    DebugMask { flags: DebugFlags, changed: bool },
    Pms(PmsAction),
    Interval { secs: u32, count: u32 },
    Status(StatusSnapshot),
    HelpIndex,
    HelpTopic(&'static CommandInfo),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Loop { active } => write!(
                f,
                "{} measurement loop",
                if *active { "run" } else { "stop" }
            ),
            CommandOutcome::Stats(stats) => write!(f, "{stats}"),
            CommandOutcome::DebugMask { flags, changed } => {
                let label = if *changed { "mask is now" } else { "debug mask:" };
                write!(f, "{label} 0x{:08x}", flags.bits())
            }
            CommandOutcome::Pms(action) => write!(f, "pms {}", action.keyword()),
            CommandOutcome::Interval { secs, count } => {
                if *count == 0 {
                    write!(f, "uplink every {secs} s")
                } else {
                    write!(f, "uplink every {secs} s for {count} cycles")
                }
            }
            CommandOutcome::Status(snapshot) => write!(f, "{snapshot}"),
            CommandOutcome::HelpIndex => {
                for (index, info) in COMMANDS.iter().enumerate() {
                    if index > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{:<10} {}", info.name, info.summary)?;
                }
                Ok(())
            }
            CommandOutcome::HelpTopic(info) => write!(f, "{}\n  {}", info.usage, info.summary),
        }
    }
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    UnknownTopic(&'a str),
    OutOfRange { name: &'static str, value: u32 },
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => err.fmt(f),
            CommandError::UnknownTopic(topic) => write!(f, "no help for `{topic}`"),
            CommandError::OutOfRange { name, value } => {
                write!(f, "{name} out of range: {value}")
            }
        }
    }
}

/// Applies console lines to a target.
pub struct CommandExecutor<T> {
    target: T,
}

impl<T: ConsoleTarget> CommandExecutor<T> {
    pub const fn new(target: T) -> Self {
        Self { target }
    }

    #[must_use]
    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.target
    }

    /// Parses and runs one line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the line does not parse or an argument is
    /// out of range.
    pub fn execute<'a>(&mut self, line: &'a str) -> Result<CommandOutcome, CommandError<'a>> {
        let command = grammar::parse(line)?;
        self.execute_command(command)
    }

    /// Runs an already-parsed command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when an argument is out of range or a help
    /// topic is unknown.
    pub fn execute_command<'a>(
        &mut self,
        command: Command<'a>,
    ) -> Result<CommandOutcome, CommandError<'a>> {
        match command {
            Command::Run | Command::Stop => {
                let active = command == Command::Run;
                self.target.set_active(active);
                Ok(CommandOutcome::Loop { active })
            }
            Command::Stats => Ok(CommandOutcome::Stats(self.target.rx_stats())),
            Command::DebugMask(None) => Ok(CommandOutcome::DebugMask {
                flags: self.target.debug_flags(),
                changed: false,
            }),
            Command::DebugMask(Some(bits)) => {
                self.target.set_debug_flags(DebugFlags::from_bits(bits));
                Ok(CommandOutcome::DebugMask {
                    flags: self.target.debug_flags(),
                    changed: true,
                })
            }
            Command::Pms(action) => {
                self.target.device_action(action);
                Ok(CommandOutcome::Pms(action))
            }
            Command::Interval { secs, count } => {
                if secs == 0 || secs > MAX_INTERVAL_SECS {
                    return Err(CommandError::OutOfRange {
                        name: "interval",
                        value: secs,
                    });
                }
                let count = count.unwrap_or(0);
                self.target.set_tx_cycle(secs, count);
                Ok(CommandOutcome::Interval { secs, count })
            }
            Command::Status => Ok(CommandOutcome::Status(self.target.status())),
            Command::Help { topic: None } => Ok(CommandOutcome::HelpIndex),
            Command::Help { topic: Some(topic) } => grammar::find_command(topic)
                .map(CommandOutcome::HelpTopic)
                .ok_or(CommandError::UnknownTopic(topic)),
        }
    }
}

/// Longest accepted uplink interval, one day.
pub const MAX_INTERVAL_SECS: u32 = 86_400;

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[derive(Default)]
    struct MockTarget {
        active: Option<bool>,
        flags: u32,
        actions: heapless::Vec<PmsAction, 4>,
        cycle: Option<(u32, u32)>,
    }

    impl ConsoleTarget for MockTarget {
        fn set_active(&mut self, enable: bool) {
            self.active = Some(enable);
        }

        fn rx_stats(&self) -> RxStats {
            RxStats {
                char_in: 64,
                good_msgs: 2,
                ..RxStats::default()
            }
        }

        fn debug_flags(&self) -> DebugFlags {
            DebugFlags::from_bits(self.flags)
        }

        fn set_debug_flags(&mut self, flags: DebugFlags) {
            self.flags = flags.bits();
        }

        fn device_action(&mut self, action: PmsAction) {
            self.actions.push(action).expect("action log");
        }

        fn set_tx_cycle(&mut self, secs: u32, count: u32) {
            self.cycle = Some((secs, count));
        }

        fn status(&mut self) -> StatusSnapshot {
            StatusSnapshot {
                device: DeviceState::Normal,
                pending: RequestSet::EMPTY,
                measurement: LoopState::Measuring,
                active: true,
                tx_cycle_secs: 30,
                tx_cycle_count: 9,
                next_uplink: Milliseconds::new(1_200),
                samples: 3,
                batch_valid: false,
            }
        }
    }

    fn render(outcome: &CommandOutcome) -> heapless::String<512> {
        let mut text = heapless::String::new();
        write!(text, "{outcome}").expect("reply fits");
        text
    }

    #[test]
    fn run_and_stop_toggle_loop() {
        let mut executor = CommandExecutor::new(MockTarget::default());

        let outcome = executor.execute("run").expect("run");
        assert_eq!(render(&outcome).as_str(), "run measurement loop");
        assert_eq!(executor.target().active, Some(true));

        executor.execute("stop").expect("stop");
        assert_eq!(executor.target().active, Some(false));
    }

    #[test]
    fn stats_renders_counters() {
        let mut executor = CommandExecutor::new(MockTarget::default());
        let outcome = executor.execute("stats").expect("stats");
        assert_eq!(
            render(&outcome).as_str(),
            "BYTES: In=64 Drops=0  MSG: Drops=0 CsErr=0 Good=2"
        );
    }

    #[test]
    fn debugmask_shows_and_sets() {
        let mut executor = CommandExecutor::new(MockTarget::default());

        let outcome = executor.execute("debugmask 0x14").expect("set");
        assert_eq!(render(&outcome).as_str(), "mask is now 0x00000014");
        assert_eq!(executor.target().flags, 0x14);

        let outcome = executor.execute("debugmask").expect("show");
        assert_eq!(render(&outcome).as_str(), "debug mask: 0x00000014");
    }

    #[test]
    fn pms_forwards_actions() {
        let mut executor = CommandExecutor::new(MockTarget::default());
        executor.execute("pms wake").expect("wake");
        executor.execute("pms sleep").expect("sleep");
        assert_eq!(
            executor.target().actions.as_slice(),
            &[PmsAction::Wake, PmsAction::Sleep]
        );
    }

    #[test]
    fn interval_validates_range() {
        let mut executor = CommandExecutor::new(MockTarget::default());

        executor.execute("interval 60 count=3").expect("interval");
        assert_eq!(executor.target().cycle, Some((60, 3)));

        executor.execute("interval 120").expect("interval");
        assert_eq!(executor.target().cycle, Some((120, 0)));

        assert_eq!(
            executor.execute("interval 0"),
            Err(CommandError::OutOfRange {
                name: "interval",
                value: 0
            })
        );
    }

    #[test]
    fn status_reports_snapshot() {
        let mut executor = CommandExecutor::new(MockTarget::default());
        let outcome = executor.execute("status").expect("status");
        let text = render(&outcome);
        assert!(text.starts_with("device: Normal (pending -)\n"));
        assert!(text.contains("loop: Measuring active samples=3 valid=false"));
        assert!(text.ends_with("next uplink in 1200ms"));
    }

    #[test]
    fn help_lists_and_describes() {
        let mut executor = CommandExecutor::new(MockTarget::default());

        let index = render(&executor.execute("help").expect("help"));
        assert_eq!(index.lines().count(), COMMANDS.len());

        match executor.execute("help debugmask") {
            Ok(CommandOutcome::HelpTopic(info)) => assert_eq!(info.name, "debugmask"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            executor.execute("help reboot"),
            Err(CommandError::UnknownTopic("reboot"))
        );
    }
}
