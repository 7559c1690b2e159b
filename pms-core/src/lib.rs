#![no_std]
#![allow(clippy::module_name_repetitions)]

//! Driver and measurement scheduling for the Plantower PMS7003 particulate sensor.
//!
//! The crate stays free of the standard library so the same state machines run
//! on the microcontroller and inside the host emulator. Hardware is reached
//! through the traits in [`device`], [`timer`] and [`uplink`].

#[macro_use]
mod fmt;

pub mod codec;
pub mod console;
pub mod device;
pub mod measurement;
pub mod orchestrator;
pub mod reducer;
pub mod telemetry;
pub mod timer;
pub mod uplink;
