//! Operator console shared by the firmware and the emulator.
//!
//! Lines are tokenized and parsed in [`grammar`]; [`commands`] applies them to
//! a [`ConsoleTarget`], normally the [`MeasurementLoop`](crate::orchestrator::MeasurementLoop).

pub mod commands;
pub mod grammar;

pub use commands::{
    CommandError, CommandExecutor, CommandOutcome, ConsoleTarget, MAX_INTERVAL_SECS,
    StatusSnapshot,
};
pub use grammar::{Command, PmsAction, parse};
