//! Detection threshold derived from the potentiometer ADC channel.

use crate::sensor::Distance;

/// Full-scale span of the 10-bit conversion the mapping expects.
pub const THRESHOLD_ADC_SPAN: u32 = 1_024;
/// Centimetres covered by the full potentiometer travel.
pub const THRESHOLD_RANGE_CM: u32 = 58;
/// Threshold with the potentiometer at zero.
pub const THRESHOLD_MIN_CM: u32 = 2;

/// Synchronous single-sample analog input.
pub trait ThresholdSource {
    /// Blocks until one conversion completes and returns the raw sample.
    fn sample(&mut self) -> u16;
}

/// Maps a raw sample onto `2..=59` cm: `raw * 58 / 1024 + 2`.
pub const fn threshold_from_raw(raw: u16) -> Distance {
    let cm = raw as u32 * THRESHOLD_RANGE_CM / THRESHOLD_ADC_SPAN + THRESHOLD_MIN_CM;
    // raw <= u16::MAX keeps cm well inside u16.
    Distance::from_cm(cm as u16)
}

/// Reads a [`ThresholdSource`] and converts the sample into a distance.
pub fn current_threshold<S: ThresholdSource>(source: &mut S) -> Distance {
    threshold_from_raw(source.sample())
}

/// Threshold source that always reports the same raw sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FixedThreshold(pub u16);

impl ThresholdSource for FixedThreshold {
    fn sample(&mut self) -> u16 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_maps_to_thirty_one_centimetres() {
        assert_eq!(threshold_from_raw(512), Distance::from_cm(31));
    }

    #[test]
    fn mapping_covers_potentiometer_travel() {
        assert_eq!(threshold_from_raw(0), Distance::from_cm(2));
        assert_eq!(threshold_from_raw(1_023), Distance::from_cm(59));
    }

    #[test]
    fn fixed_source_feeds_current_threshold() {
        let mut source = FixedThreshold(512);
        assert_eq!(current_threshold(&mut source), Distance::from_cm(31));
    }
}
