//! Ultrasonic time-of-flight distance sensor.
//!
//! A measurement drives a short pulse on the trigger line, restarts the
//! monotonic clock and arms the echo capture. The edge interrupt then records
//! the echo pulse width, which converts linearly into centimetres.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::capture::EchoCapture;
use crate::clock::{ExhaustionHandler, HardwareCounter, MonotonicClock, Ticks};

/// Low time before the trigger pulse (µs).
pub const TRIGGER_SETTLE_US: u32 = 10;
/// High time of the trigger pulse (µs).
pub const TRIGGER_PULSE_US: u32 = 10;
/// Longest wait for the echo before the read gives up (µs).
pub const DEFAULT_ECHO_TIMEOUT_US: u32 = 50_000;

/// Round-trip centimetres per microsecond of echo: 0.017 = 17 / 1000.
const ECHO_CM_NUMERATOR: u64 = 17;
const ECHO_CM_DENOMINATOR: u64 = 1_000;

/// Distance in whole centimetres.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Distance(u16);

impl Distance {
    pub const ZERO: Self = Self(0);

    pub const fn from_cm(cm: u16) -> Self {
        Self(cm)
    }

    pub const fn as_cm(self) -> u16 {
        self.0
    }

    /// Converts an echo pulse width in microseconds, truncating and
    /// saturating at `u16::MAX` centimetres.
    pub fn from_echo_micros(micros: u64) -> Self {
        let cm = micros.saturating_mul(ECHO_CM_NUMERATOR) / ECHO_CM_DENOMINATOR;
        Self(u16::try_from(cm).unwrap_or(u16::MAX))
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cm", self.0)
    }
}

/// Reasons a distance measurement did not produce a reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasureError {
    /// No complete echo pulse arrived within the configured bound.
    EchoTimeout,
    /// The trigger output could not be driven.
    Trigger,
}

impl fmt::Display for MeasureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureError::EchoTimeout => f.write_str("echo-timeout"),
            MeasureError::Trigger => f.write_str("trigger-pin-fault"),
        }
    }
}

/// Source of blocking distance readings consumed by the control loop.
pub trait DistanceReader {
    fn read_distance(&mut self) -> Result<Distance, MeasureError>;
}

/// Sensor tuning.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorConfig {
    /// Clock ticks after the trigger before a read reports
    /// [`MeasureError::EchoTimeout`].
    pub echo_timeout_ticks: Ticks,
}

impl SensorConfig {
    pub const fn new(echo_timeout_ticks: Ticks) -> Self {
        Self { echo_timeout_ticks }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        // Reference ticks are 1 µs.
        Self::new(DEFAULT_ECHO_TIMEOUT_US)
    }
}

/// HC-SR04 style sensor driven through a trigger pin and an echo capture.
pub struct DistanceSensor<'a, P, D, C, H> {
    trigger: P,
    delay: D,
    clock: &'a MonotonicClock<C, H>,
    capture: &'a EchoCapture,
    config: SensorConfig,
}

impl<'a, P, D, C, H> DistanceSensor<'a, P, D, C, H>
where
    P: OutputPin,
    D: DelayNs,
    C: HardwareCounter,
    H: ExhaustionHandler,
{
    pub fn new(
        trigger: P,
        delay: D,
        clock: &'a MonotonicClock<C, H>,
        capture: &'a EchoCapture,
        config: SensorConfig,
    ) -> Self {
        Self {
            trigger,
            delay,
            clock,
            capture,
            config,
        }
    }

    pub fn config(&self) -> SensorConfig {
        self.config
    }

    pub fn trigger(&self) -> &P {
        &self.trigger
    }

    /// Emits the trigger pulse, restarts the clock from zero and arms the
    /// capture for a start edge.
    pub fn trigger_pulse(&mut self) -> Result<(), MeasureError> {
        self.trigger.set_low().map_err(|_| MeasureError::Trigger)?;
        self.delay.delay_us(TRIGGER_SETTLE_US);
        self.trigger.set_high().map_err(|_| MeasureError::Trigger)?;
        self.delay.delay_us(TRIGGER_PULSE_US);
        self.trigger.set_low().map_err(|_| MeasureError::Trigger)?;

        self.clock.stop();
        self.clock.start();
        self.capture.arm();
        Ok(())
    }

    /// Triggers a measurement and spins until the echo completes or the
    /// timeout elapses.
    pub fn read_sync(&mut self) -> Result<Distance, MeasureError> {
        self.capture.clear();
        self.trigger_pulse()?;

        loop {
            if let Some(width) = self.capture.pulse_width() {
                return Ok(self.distance_for(width));
            }

            if self.clock.now() >= self.config.echo_timeout_ticks {
                let late = self.capture.abandon();
                self.clock.stop();
                return match late {
                    Some(width) => Ok(self.distance_for(width)),
                    None => Err(MeasureError::EchoTimeout),
                };
            }

            core::hint::spin_loop();
        }
    }

    /// Converts a pulse width in clock ticks into a distance.
    pub fn distance_for(&self, width: Ticks) -> Distance {
        Distance::from_echo_micros(self.clock.ticks_to_micros(width))
    }

    /// Releases the trigger pin and delay provider.
    pub fn release(self) -> (P, D) {
        (self.trigger, self.delay)
    }
}

impl<P, D, C, H> DistanceReader for DistanceSensor<'_, P, D, C, H>
where
    P: OutputPin,
    D: DelayNs,
    C: HardwareCounter,
    H: ExhaustionHandler,
{
    fn read_distance(&mut self) -> Result<Distance, MeasureError> {
        self.read_sync()
    }
}
