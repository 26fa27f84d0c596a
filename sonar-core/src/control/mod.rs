//! Proximity relay state machine.
//!
//! The loop cycles `Idle → Triggered → Disabled → Idle`. Idle polls the manual
//! override and the distance sensor once per poll interval, Triggered toggles
//! the relay exactly once, and Disabled holds off any sensing until the dwell
//! time has elapsed. Both gates compare against an injected [`TimeSource`]
//! rather than blocking, so [`ControlLoop::step`] returns promptly whenever
//! nothing is due.

use core::{fmt, ops::Add, time::Duration};

use embedded_hal::digital::{InputPin, StatefulOutputPin};

use crate::sensor::{Distance, DistanceReader, MeasureError};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};
use crate::threshold::{ThresholdSource, current_threshold};

/// Delay between sensor polls while idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(40);
/// Time the relay stays latched before sensing resumes.
pub const DEFAULT_DISABLE_DWELL: Duration = Duration::from_millis(700);

/// Monotonic time base for the state gates.
pub trait TimeSource {
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    fn now(&self) -> Self::Instant;
}

/// Control loop states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlState {
    Idle,
    Triggered,
    Disabled,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlState::Idle => "idle",
            ControlState::Triggered => "triggered",
            ControlState::Disabled => "disabled",
        })
    }
}

/// Poll and dwell timing for the loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlTiming {
    pub poll_interval: Duration,
    pub disable_dwell: Duration,
}

impl ControlTiming {
    pub const fn new(poll_interval: Duration, disable_dwell: Duration) -> Self {
        Self {
            poll_interval,
            disable_dwell,
        }
    }
}

impl Default for ControlTiming {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_DISABLE_DWELL)
    }
}

/// Why the loop left `Idle`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerCause {
    Proximity {
        distance: Distance,
        threshold: Distance,
    },
    ManualOverride,
}

/// Result of a single [`ControlLoop::step`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The active gate has not elapsed yet.
    Waiting,
    /// A reading was taken and nothing was within range.
    Clear {
        distance: Distance,
        threshold: Distance,
    },
    /// The sensor saw no echo; the loop stays idle.
    EchoTimeout,
    /// `Idle → Triggered`.
    Triggered(TriggerCause),
    /// `Triggered → Disabled`; the relay was toggled.
    RelayToggled,
    /// `Disabled → Idle`.
    Rearmed,
}

/// Faults that stop the loop from evaluating.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlError {
    Sensor(MeasureError),
    Relay,
    ManualInput,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Sensor(err) => write!(f, "sensor: {err}"),
            ControlError::Relay => f.write_str("relay-pin-fault"),
            ControlError::ManualInput => f.write_str("manual-input-fault"),
        }
    }
}

/// Three-state proximity control loop.
pub struct ControlLoop<S, T, R, M, K>
where
    K: TimeSource,
{
    sensor: S,
    threshold: T,
    relay: R,
    manual: M,
    time: K,
    timing: ControlTiming,
    state: ControlState,
    state_entry_time: K::Instant,
    telemetry: TelemetryRecorder<K::Instant>,
}

impl<S, T, R, M, K> ControlLoop<S, T, R, M, K>
where
    S: DistanceReader,
    T: ThresholdSource,
    R: StatefulOutputPin,
    M: InputPin,
    K: TimeSource,
{
    /// Builds a loop in `Idle`; the first poll happens one interval later.
    pub fn new(sensor: S, threshold: T, relay: R, manual: M, time: K, timing: ControlTiming) -> Self {
        let state_entry_time = time.now();
        Self {
            sensor,
            threshold,
            relay,
            manual,
            time,
            timing,
            state: ControlState::Idle,
            state_entry_time,
            telemetry: TelemetryRecorder::new(),
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn state_entry_time(&self) -> K::Instant {
        self.state_entry_time
    }

    pub fn timing(&self) -> ControlTiming {
        self.timing
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<K::Instant> {
        &self.telemetry
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn threshold_mut(&mut self) -> &mut T {
        &mut self.threshold
    }

    pub fn relay_mut(&mut self) -> &mut R {
        &mut self.relay
    }

    pub fn manual_mut(&mut self) -> &mut M {
        &mut self.manual
    }

    pub fn time(&self) -> &K {
        &self.time
    }

    /// Runs one evaluation of the state machine.
    pub fn step(&mut self) -> Result<StepOutcome, ControlError> {
        let now = self.time.now();
        match self.state {
            ControlState::Idle => self.evaluate_idle(now),
            ControlState::Triggered => {
                self.relay.toggle().map_err(|_| ControlError::Relay)?;
                self.telemetry
                    .record(TelemetryEventKind::RelayToggled, TelemetryPayload::None, now);
                self.enter(ControlState::Disabled, now);
                Ok(StepOutcome::RelayToggled)
            }
            ControlState::Disabled => {
                if now < self.state_entry_time + self.timing.disable_dwell {
                    return Ok(StepOutcome::Waiting);
                }
                self.enter(ControlState::Idle, now);
                Ok(StepOutcome::Rearmed)
            }
        }
    }

    fn evaluate_idle(&mut self, now: K::Instant) -> Result<StepOutcome, ControlError> {
        if now < self.state_entry_time + self.timing.poll_interval {
            return Ok(StepOutcome::Waiting);
        }
        self.state_entry_time = now;

        // Active-low button, checked before the sensor.
        if self.manual.is_low().map_err(|_| ControlError::ManualInput)? {
            self.telemetry
                .record(TelemetryEventKind::ManualOverride, TelemetryPayload::None, now);
            self.enter(ControlState::Triggered, now);
            return Ok(StepOutcome::Triggered(TriggerCause::ManualOverride));
        }

        let distance = match self.sensor.read_distance() {
            Ok(distance) => distance,
            Err(MeasureError::EchoTimeout) => {
                self.telemetry
                    .record(TelemetryEventKind::EchoTimeout, TelemetryPayload::None, now);
                return Ok(StepOutcome::EchoTimeout);
            }
            Err(err) => return Err(ControlError::Sensor(err)),
        };
        let threshold = current_threshold(&mut self.threshold);

        if distance < threshold {
            self.telemetry.record_detection(distance, threshold, now);
            self.enter(ControlState::Triggered, now);
            Ok(StepOutcome::Triggered(TriggerCause::Proximity {
                distance,
                threshold,
            }))
        } else {
            Ok(StepOutcome::Clear {
                distance,
                threshold,
            })
        }
    }

    fn enter(&mut self, state: ControlState, now: K::Instant) {
        self.state = state;
        self.state_entry_time = now;
        self.telemetry.record_state_entered(state, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::cell::Cell;
    use core::convert::Infallible;

    use embedded_hal::digital::ErrorType;

    use crate::threshold::FixedThreshold;

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
    struct Millis(u64);

    impl Add<Duration> for Millis {
        type Output = Millis;

        fn add(self, rhs: Duration) -> Self::Output {
            Millis(self.0 + rhs.as_millis() as u64)
        }
    }

    struct ManualTime(Cell<u64>);

    impl ManualTime {
        fn advance(&self, millis: u64) {
            self.0.set(self.0.get() + millis);
        }
    }

    impl TimeSource for &ManualTime {
        type Instant = Millis;

        fn now(&self) -> Millis {
            Millis(self.0.get())
        }
    }

    struct FixedReader(Distance);

    impl DistanceReader for FixedReader {
        fn read_distance(&mut self) -> Result<Distance, MeasureError> {
            Ok(self.0)
        }
    }

    /// Override button that is never pressed.
    struct Released;

    impl ErrorType for Released {
        type Error = Infallible;
    }

    impl InputPin for Released {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(true)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct Relay {
        high: bool,
        toggles: u32,
    }

    impl ErrorType for Relay {
        type Error = Infallible;
    }

    impl embedded_hal::digital::OutputPin for Relay {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for Relay {
        fn is_set_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.high)
        }

        fn toggle(&mut self) -> Result<(), Self::Error> {
            self.high = !self.high;
            self.toggles += 1;
            Ok(())
        }
    }

    #[test]
    fn idle_waits_one_poll_interval_before_first_reading() {
        let time = ManualTime(Cell::new(0));
        let mut control = ControlLoop::new(
            FixedReader(Distance::from_cm(10)),
            FixedThreshold(512),
            Relay::default(),
            Released,
            &time,
            ControlTiming::default(),
        );

        assert_eq!(control.step(), Ok(StepOutcome::Waiting));
        time.advance(39);
        assert_eq!(control.step(), Ok(StepOutcome::Waiting));
        time.advance(1);
        assert_eq!(
            control.step(),
            Ok(StepOutcome::Triggered(TriggerCause::Proximity {
                distance: Distance::from_cm(10),
                threshold: Distance::from_cm(31),
            }))
        );
        assert_eq!(control.state(), ControlState::Triggered);
    }

    #[test]
    fn full_cycle_toggles_once_and_rearms_after_dwell() {
        let time = ManualTime(Cell::new(0));
        let mut control = ControlLoop::new(
            FixedReader(Distance::from_cm(5)),
            FixedThreshold(512),
            Relay::default(),
            Released,
            &time,
            ControlTiming::default(),
        );

        time.advance(40);
        assert!(matches!(control.step(), Ok(StepOutcome::Triggered(_))));
        assert_eq!(control.step(), Ok(StepOutcome::RelayToggled));
        assert_eq!(control.state(), ControlState::Disabled);

        time.advance(699);
        assert_eq!(control.step(), Ok(StepOutcome::Waiting));
        time.advance(1);
        assert_eq!(control.step(), Ok(StepOutcome::Rearmed));
        assert_eq!(control.state(), ControlState::Idle);

        assert_eq!(control.relay_mut().toggles, 1);
        assert!(control.relay_mut().high);
    }

    #[test]
    fn control_state_names() {
        use std::string::ToString;

        assert_eq!(ControlState::Disabled.to_string(), "disabled");
        assert_eq!(
            ControlError::Sensor(MeasureError::Trigger).to_string(),
            "sensor: trigger-pin-fault"
        );
    }
}
