//! Potentiometer sampling for the detection threshold.

use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, Resolution, SampleTime};
use embassy_stm32::peripherals::{ADC1, PA1};
use sonar_core::threshold::ThresholdSource;

/// Blocking single-channel ADC read of the threshold potentiometer.
pub struct PotThreshold<'d> {
    adc: Adc<'d, ADC1>,
    pin: Peri<'d, PA1>,
}

impl<'d> PotThreshold<'d> {
    /// Configures 10-bit conversions so samples match the threshold mapping.
    pub fn new(mut adc: Adc<'d, ADC1>, pin: Peri<'d, PA1>) -> Self {
        adc.set_resolution(Resolution::BITS10);
        adc.set_sample_time(SampleTime::CYCLES79_5);
        Self { adc, pin }
    }
}

impl ThresholdSource for PotThreshold<'_> {
    fn sample(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.pin)
    }
}
