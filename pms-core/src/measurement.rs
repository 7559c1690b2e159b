//! Particulate readings reported by the sensor.
//!
//! The same shapes carry raw `u16` wire values and reduced `f32` results.

/// Mass concentration triple in µg/m³ (PM1.0, PM2.5, PM10).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PmBins<T> {
    pub m1p0: T,
    pub m2p5: T,
    pub m10: T,
}

/// Particle counts per 0.1 L of air, by minimum diameter.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DustBins<T> {
    pub m0p3: T,
    pub m0p5: T,
    pub m1p0: T,
    pub m2p5: T,
    pub m5: T,
    pub m10: T,
}

/// One complete sensor report.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements<T> {
    /// Standard-particle (CF=1) mass concentrations.
    pub cf1: PmBins<T>,
    /// Atmospheric-environment mass concentrations.
    pub atm: PmBins<T>,
    pub dust: DustBins<T>,
}

/// Number of scalar channels in a [`Measurements`] value.
pub const CHANNEL_COUNT: usize = 12;

impl<T: Copy> Measurements<T> {
    /// Builds a report from channels in wire order: cf1, atm, then dust.
    #[must_use]
    pub fn from_channels(channels: [T; CHANNEL_COUNT]) -> Self {
        let [c0, c1, c2, a0, a1, a2, d0, d1, d2, d3, d4, d5] = channels;
        Self {
            cf1: PmBins {
                m1p0: c0,
                m2p5: c1,
                m10: c2,
            },
            atm: PmBins {
                m1p0: a0,
                m2p5: a1,
                m10: a2,
            },
            dust: DustBins {
                m0p3: d0,
                m0p5: d1,
                m1p0: d2,
                m2p5: d3,
                m5: d4,
                m10: d5,
            },
        }
    }

    /// Flattens the report into wire order.
    #[must_use]
    pub fn channels(&self) -> [T; CHANNEL_COUNT] {
        [
            self.cf1.m1p0,
            self.cf1.m2p5,
            self.cf1.m10,
            self.atm.m1p0,
            self.atm.m2p5,
            self.atm.m10,
            self.dust.m0p3,
            self.dust.m0p5,
            self.dust.m1p0,
            self.dust.m2p5,
            self.dust.m5,
            self.dust.m10,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_order_matches_wire_layout() {
        let values: [u16; CHANNEL_COUNT] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let report = Measurements::from_channels(values);

        assert_eq!(report.cf1.m10, 3);
        assert_eq!(report.atm.m1p0, 4);
        assert_eq!(report.dust.m0p3, 7);
        assert_eq!(report.dust.m10, 12);
        assert_eq!(report.channels(), values);
    }
}
