//! Per-channel sample accumulation for one measurement cycle.

use crate::measurement::{CHANNEL_COUNT, Measurements};
use crate::reducer::{self, MIN_SAMPLES, ReduceError};

/// Fixed window of `N` reports, stored channel by channel.
#[derive(Clone, Debug)]
pub struct SampleWindow<const N: usize> {
    channels: [[u16; N]; CHANNEL_COUNT],
    len: usize,
}

impl<const N: usize> SampleWindow<N> {
    const VALID_SIZE: () = assert!(N >= MIN_SAMPLES, "window must hold at least 4 samples");

    #[must_use]
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_SIZE;
        Self {
            channels: [[0; N]; CHANNEL_COUNT],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Appends one report; returns `false` once the window is already full.
    pub fn push(&mut self, report: &Measurements<u16>) -> bool {
        if self.is_full() {
            return false;
        }
        for (channel, value) in self.channels.iter_mut().zip(report.channels()) {
            channel[self.len] = value;
        }
        self.len += 1;
        true
    }

    /// Reduces every channel of a full window. Sorts the stored samples.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::TooFewSamples`] when the window is not full.
    pub fn reduce(&mut self) -> Result<Measurements<f32>, ReduceError> {
        if !self.is_full() {
            return Err(ReduceError::TooFewSamples { len: self.len });
        }

        let mut reduced = [0.0; CHANNEL_COUNT];
        for (out, samples) in reduced.iter_mut().zip(self.channels.iter_mut()) {
            *out = reducer::reduce(samples)?;
        }
        Ok(Measurements::from_channels(reduced))
    }
}

impl<const N: usize> Default for SampleWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}
