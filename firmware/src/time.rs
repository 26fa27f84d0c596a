#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Embassy-backed instant used by the control loop gates.

use core::ops::Add;

use embassy_time::{Duration as EmbassyDuration, Instant};

/// Wrapper around [`embassy_time::Instant`] that accepts `core::time::Duration`
/// offsets, as required by `sonar_core::control::TimeSource`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<core::time::Duration> for FirmwareInstant {
    type Output = FirmwareInstant;

    fn add(self, rhs: core::time::Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(
            self.0
                .checked_add(EmbassyDuration::from_micros(micros))
                .unwrap_or(Instant::MAX),
        )
    }
}

/// [`sonar_core::control::TimeSource`] reading the embassy time driver.
#[cfg(target_os = "none")]
pub struct EmbassyClock;

#[cfg(target_os = "none")]
impl sonar_core::control::TimeSource for EmbassyClock {
    type Instant = FirmwareInstant;

    fn now(&self) -> FirmwareInstant {
        FirmwareInstant::from(Instant::now())
    }
}
