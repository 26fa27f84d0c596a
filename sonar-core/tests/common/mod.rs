#![allow(dead_code)]

use core::cell::Cell;
use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use sonar_core::clock::{ExhaustionHandler, HardwareCounter};

/// 8-bit style counter register; `count()` advances by `step` on every read
/// so blocking loops observe time passing.
pub struct MockCounter {
    value: AtomicU32,
    step: AtomicU32,
    prescale: AtomicU16,
    enabled: AtomicBool,
    irq_enabled: AtomicBool,
}

impl MockCounter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
            step: AtomicU32::new(0),
            prescale: AtomicU16::new(0),
            enabled: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
        }
    }

    pub fn auto_advance(step: u32) -> Self {
        let counter = Self::new();
        counter.step.store(step, Ordering::SeqCst);
        counter
    }

    pub fn set(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn raw(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn prescale(&self) -> u16 {
        self.prescale.load(Ordering::SeqCst)
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::SeqCst)
    }
}

impl HardwareCounter for MockCounter {
    const QUANTUM: u32 = 255;

    fn enable_overflow_interrupt(&self) {
        self.irq_enabled.store(true, Ordering::SeqCst);
    }

    fn start(&self, prescale: u16) {
        self.prescale.store(prescale, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn halt(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }

    fn count(&self) -> u32 {
        let step = self.step.load(Ordering::SeqCst);
        self.value.fetch_add(step, Ordering::SeqCst)
    }
}

/// Counts exhaustion callbacks instead of resetting anything.
pub struct CountingHandler(AtomicU32);

impl CountingHandler {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn calls(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl ExhaustionHandler for CountingHandler {
    fn on_exhaustion(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Level history of a trigger pin.
#[derive(Default)]
pub struct RecordingPin {
    pub levels: Vec<bool>,
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.push(true);
        Ok(())
    }
}

/// Delay provider that only sums requested microseconds.
#[derive(Default)]
pub struct RecordingDelay {
    pub total_ns: u64,
    pub calls: u32,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
        self.calls += 1;
    }
}

#[derive(Default)]
pub struct MockRelay {
    pub high: bool,
    pub toggles: u32,
}

impl ErrorType for MockRelay {
    type Error = Infallible;
}

impl OutputPin for MockRelay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

impl StatefulOutputPin for MockRelay {
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

/// Active-low push button.
#[derive(Default)]
pub struct MockButton {
    pub pressed: bool,
}

impl ErrorType for MockButton {
    type Error = Infallible;
}

impl InputPin for MockButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed)
    }
}

/// Millisecond host clock advanced by hand.
pub struct ManualTime(Cell<u64>);

impl ManualTime {
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    pub fn advance_ms(&self, millis: u64) {
        self.0.set(self.0.get() + millis);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(pub u64);

impl core::ops::Add<core::time::Duration> for MockInstant {
    type Output = MockInstant;

    fn add(self, rhs: core::time::Duration) -> Self::Output {
        MockInstant(self.0 + u64::try_from(rhs.as_millis()).unwrap())
    }
}

impl sonar_core::control::TimeSource for &ManualTime {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(self.0.get())
    }
}
