//! Interquartile-range outlier trimming.
//!
//! The window is sorted in place. Values below `Q1 - 1.5 * IQR` are skipped
//! from the low end (never past Q1) and values above `Q3 + 1.5 * IQR` from the
//! high end (never past Q3); the remainder is averaged and scaled by 1/65535.

use core::fmt;
use core::ops::RangeInclusive;

/// Smallest window for which Q1 and Q3 are distinct.
pub const MIN_SAMPLES: usize = 4;

/// Full-scale value used to normalize channel means.
pub const FULL_SCALE: f32 = 65_535.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReduceError {
    TooFewSamples { len: usize },
}

impl fmt::Display for ReduceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceError::TooFewSamples { len } => {
                write!(f, "need at least {MIN_SAMPLES} samples, got {len}")
            }
        }
    }
}

/// Intermediate values of one reduction, indices refer to the sorted window.
#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    pub q1: usize,
    pub q3: usize,
    pub iqr: i32,
    /// `floor(1.5 * iqr)`.
    pub bound: i32,
    pub low_limit: i32,
    pub high_limit: i32,
    /// Indices of the samples that contribute to the mean.
    pub retained: RangeInclusive<usize>,
    pub sum: u32,
    /// Trimmed mean divided by [`FULL_SCALE`].
    pub value: f32,
}

/// Sorts `samples` and computes the trimmed, normalized mean.
///
/// # Errors
///
/// Returns [`ReduceError::TooFewSamples`] for windows shorter than [`MIN_SAMPLES`].
pub fn analyze(samples: &mut [u16]) -> Result<Reduction, ReduceError> {
    let len = samples.len();
    if len < MIN_SAMPLES {
        return Err(ReduceError::TooFewSamples { len });
    }

    let q1 = len / 4;
    let q3 = len - len / 4 - 1;
    samples.sort_unstable();

    let iqr = i32::from(samples[q3]) - i32::from(samples[q1]);
    let bound = (3 * iqr) >> 1;
    let low_limit = i32::from(samples[q1]) - bound;
    let high_limit = i32::from(samples[q3]) + bound;

    let mut first = 0;
    while first < q1 && i32::from(samples[first]) < low_limit {
        first += 1;
    }

    let mut last = len - 1;
    while last > q3 && i32::from(samples[last]) > high_limit {
        last -= 1;
    }

    let sum: u32 = samples[first..=last].iter().map(|v| u32::from(*v)).sum();
    #[allow(clippy::cast_precision_loss)]
    let value = sum as f32 / ((last - first + 1) as f32 * FULL_SCALE);

    Ok(Reduction {
        q1,
        q3,
        iqr,
        bound,
        low_limit,
        high_limit,
        retained: first..=last,
        sum,
        value,
    })
}

/// Sorts `samples` and returns the trimmed mean scaled into `0.0..=1.0`.
///
/// # Errors
///
/// Returns [`ReduceError::TooFewSamples`] for windows shorter than [`MIN_SAMPLES`].
pub fn reduce(samples: &mut [u16]) -> Result<f32, ReduceError> {
    analyze(samples).map(|reduction| reduction.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: [u16; 21] = [
        777, 789, 771, 753, 738, 750, 762, 711, 729, 798, 798, 756, 756, 747, 747, 795, 795, 789,
        789, 831, 831,
    ];

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= expected * 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn reference_window_keeps_every_sample() {
        let mut samples = REFERENCE;
        let reduction = analyze(&mut samples).expect("21 samples");

        assert_eq!(
            samples,
            [
                711, 729, 738, 747, 747, 750, 753, 756, 756, 762, 771, 777, 789, 789, 789, 795, 795,
                798, 798, 831, 831
            ]
        );
        assert_eq!(reduction.q1, 5);
        assert_eq!(reduction.q3, 15);
        assert_eq!(samples[reduction.q1], 750);
        assert_eq!(samples[reduction.q3], 795);
        assert_eq!(reduction.iqr, 45);
        assert_eq!(reduction.bound, 67);
        assert_eq!(reduction.low_limit, 683);
        assert_eq!(reduction.high_limit, 862);
        assert_eq!(reduction.retained, 0..=20);
        assert_eq!(reduction.sum, 16_212);

        let raw_mean = reduction.value * FULL_SCALE;
        assert!(raw_mean > 711.0 && raw_mean < 831.0);
        assert_close(reduction.value, 16_212.0 / (21.0 * FULL_SCALE));
    }

    #[test]
    fn high_outlier_is_trimmed() {
        let mut samples = [10, 10, 1_000, 10, 10, 10, 10, 10, 10, 10];
        let reduction = analyze(&mut samples).expect("10 samples");

        assert_eq!(reduction.iqr, 0);
        assert_eq!(reduction.retained, 0..=8);
        assert_eq!(reduction.sum, 90);
        assert_close(reduction.value, 10.0 / FULL_SCALE);
    }

    #[test]
    fn low_outlier_is_trimmed() {
        let mut samples = [100, 100, 100, 0, 100, 100, 100, 100, 100, 100];
        let reduction = analyze(&mut samples).expect("10 samples");

        assert_eq!(reduction.retained, 1..=9);
        assert_eq!(reduction.sum, 900);
    }

    #[test]
    fn cursors_stop_at_quartiles() {
        let mut samples = [0, 0, 0, 500, 500, 500, 500, 500, 500, 9_000, 9_000, 9_000];
        let reduction = analyze(&mut samples).expect("12 samples");

        assert_eq!(reduction.q1, 3);
        assert_eq!(reduction.q3, 8);
        assert_eq!(reduction.low_limit, 500);
        assert_eq!(reduction.high_limit, 500);
        assert_eq!(reduction.retained, 3..=8);
        assert_eq!(reduction.sum, 3_000);
    }

    #[test]
    fn rejects_short_windows() {
        let mut samples = [1, 2, 3];
        assert_eq!(
            reduce(&mut samples),
            Err(ReduceError::TooFewSamples { len: 3 })
        );
        let mut flat = [7u16; MIN_SAMPLES];
        assert!(reduce(&mut flat).is_ok());
    }
}
