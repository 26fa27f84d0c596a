//! Simulated board for the emulator.
//!
//! The 8-bit timer, the echo line and the reset circuitry are modelled with
//! atomics. A background thread plays the part of the echo interrupt: once the
//! sensor arms the capture it either delivers a pulse whose width matches the
//! simulated obstacle or keeps the timer running until the reader gives up.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};
use sonar_core::capture::EchoCapture;
use sonar_core::clock::{ClockConfig, ExhaustionHandler, HardwareCounter, MonotonicClock, Ticks};
use sonar_core::threshold::ThresholdSource;

/// Farthest obstacle the simulated transducer still answers for.
pub const MAX_RANGE_CM: u16 = 400;

/// Delay between the trigger and the start of the echo pulse.
const ECHO_LEAD_TICKS: Ticks = 120;
const NO_TARGET: u16 = u16::MAX;
const ECHO_IDLE_POLL: Duration = Duration::from_micros(200);

/// Free-running 8-bit timer register.
pub struct SimCounter {
    value: AtomicU32,
    enabled: AtomicBool,
}

impl SimCounter {
    const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    fn set(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl HardwareCounter for SimCounter {
    const QUANTUM: u32 = 255;

    fn enable_overflow_interrupt(&self) {}

    fn start(&self, _prescale: u16) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn halt(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }

    fn count(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Counts resets instead of restarting the process.
pub struct SimReset {
    resets: AtomicU32,
}

impl SimReset {
    const fn new() -> Self {
        Self {
            resets: AtomicU32::new(0),
        }
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl ExhaustionHandler for SimReset {
    fn on_exhaustion(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub type SimClock = MonotonicClock<SimCounter, SimReset>;

/// Shared state of the simulated board.
pub struct SimHardware {
    pub clock: SimClock,
    pub echo: EchoCapture,
    target_cm: AtomicU16,
    shutdown: AtomicBool,
}

impl SimHardware {
    /// Creates a board and starts its echo thread.
    ///
    /// The board is leaked so the thread and the `'static` sensor borrows can
    /// share it; each session leaks one board, which a single REPL never notices.
    pub fn boot() -> (&'static SimHardware, JoinHandle<()>) {
        let hardware: &'static SimHardware = Box::leak(Box::new(SimHardware {
            clock: MonotonicClock::new(SimCounter::new(), SimReset::new()),
            echo: EchoCapture::new(),
            target_cm: AtomicU16::new(NO_TARGET),
            shutdown: AtomicBool::new(false),
        }));
        hardware.clock.configure(ClockConfig::default());

        let handle = thread::Builder::new()
            .name("echo-isr".into())
            .spawn(move || hardware.run_echo())
            .expect("spawn echo thread");
        (hardware, handle)
    }

    /// Places an obstacle in front of the sensor, or removes it with `None`.
    pub fn set_target(&self, distance_cm: Option<u16>) {
        let raw = distance_cm.map_or(NO_TARGET, |cm| cm.min(NO_TARGET - 1));
        self.target_cm.store(raw, Ordering::SeqCst);
    }

    pub fn target(&self) -> Option<u16> {
        match self.target_cm.load(Ordering::SeqCst) {
            NO_TARGET => None,
            cm => Some(cm),
        }
    }

    pub fn resets(&self) -> u32 {
        self.clock.exhaustion_handler().resets()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Drives overflow interrupts until the clock hands over to the reset
    /// handler. Returns the number of overflows delivered.
    pub fn exhaust_clock(&self) -> u64 {
        let resets_before = self.resets();
        let mut overflows = 0_u64;
        self.clock.stop();
        while self.resets() == resets_before {
            self.clock.on_overflow();
            overflows += 1;
        }
        self.clock.stop();
        overflows
    }

    fn run_echo(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let capture = self.echo.snapshot();
            if capture.armed() {
                self.serve_cycle(capture.cycle);
            } else {
                thread::park_timeout(ECHO_IDLE_POLL);
            }
        }
    }

    /// Plays one trigger cycle. Without an obstacle in range the timer keeps
    /// ticking until the reader closes the window or an obstacle appears.
    fn serve_cycle(&self, cycle: u16) {
        while self.owns(cycle) && !self.shutdown.load(Ordering::SeqCst) {
            if let Some(cm) = self.target().filter(|cm| *cm <= MAX_RANGE_CM) {
                self.deliver_echo(cycle, cm);
                return;
            }
            let next = self.clock.now().saturating_add(SimCounter::QUANTUM);
            self.advance_to(cycle, next);
            thread::yield_now();
        }
    }

    fn deliver_echo(&self, cycle: u16, distance_cm: u16) {
        let width = self.clock.config().micros_to_ticks(echo_micros_for(distance_cm));
        let start = self.clock.now().max(ECHO_LEAD_TICKS);
        self.advance_to(cycle, start);
        self.edge(cycle);
        self.advance_to(cycle, start.saturating_add(width));
        self.edge(cycle);
    }

    /// `true` while `cycle` is the capture window the reader is waiting on.
    fn owns(&self, cycle: u16) -> bool {
        self.clock.is_running() && self.echo.snapshot().in_flight(cycle)
    }

    fn edge(&self, cycle: u16) {
        critical_section::with(|_| {
            if self.owns(cycle) {
                self.echo.on_edge(&self.clock);
            }
        });
    }

    /// Moves the timer forward to `target` ticks since the last restart,
    /// raising one overflow per wrapped quantum. Each step re-checks that the
    /// reader has not closed `cycle` or started the next one.
    fn advance_to(&self, cycle: u16, target: Ticks) {
        let counter = self.clock.counter();
        loop {
            let done = critical_section::with(|_| {
                if !self.owns(cycle) {
                    return true;
                }
                let base = self.clock.extended_ticks();
                if base.saturating_add(SimCounter::QUANTUM) <= target {
                    counter.set(0);
                    self.clock.on_overflow();
                    false
                } else {
                    counter.set(target.saturating_sub(base));
                    true
                }
            });
            if done {
                return;
            }
        }
    }
}

/// Shortest echo width that still converts back to `distance_cm`.
pub fn echo_micros_for(distance_cm: u16) -> u64 {
    (u64::from(distance_cm) * 1_000).div_ceil(17)
}

/// Trigger output; counts rising edges.
#[derive(Default)]
pub struct TriggerPin {
    high: bool,
    pulses: u32,
}

impl TriggerPin {
    pub fn pulses(&self) -> u32 {
        self.pulses
    }
}

impl ErrorType for TriggerPin {
    type Error = Infallible;
}

impl OutputPin for TriggerPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.high {
            self.pulses += 1;
        }
        self.high = true;
        Ok(())
    }
}

/// Busy-wait provider; simulated time does not pass during the trigger pulse.
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Relay coil output.
#[derive(Default)]
pub struct SimRelay {
    energised: bool,
    toggles: u32,
}

impl SimRelay {
    pub fn energised(&self) -> bool {
        self.energised
    }

    pub fn toggles(&self) -> u32 {
        self.toggles
    }
}

impl ErrorType for SimRelay {
    type Error = Infallible;
}

impl OutputPin for SimRelay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.energised = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.energised = true;
        Ok(())
    }
}

impl StatefulOutputPin for SimRelay {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.energised)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.energised)
    }

    fn toggle(&mut self) -> Result<(), Self::Error> {
        self.energised = !self.energised;
        self.toggles += 1;
        Ok(())
    }
}

/// Active-low override button with a pull-up.
#[derive(Default)]
pub struct SimButton {
    pub pressed: bool,
}

impl ErrorType for SimButton {
    type Error = Infallible;
}

impl InputPin for SimButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed)
    }
}

/// Potentiometer wiper on a 10-bit ADC.
pub struct SimPot {
    pub raw: u16,
}

impl ThresholdSource for SimPot {
    fn sample(&mut self) -> u16 {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sonar_core::sensor::{Distance, DistanceSensor, MeasureError, SensorConfig};

    #[test]
    fn echo_width_converts_back_to_requested_distance() {
        for cm in [0, 1, 2, 17, 29, 31, 59, 400] {
            let micros = echo_micros_for(cm);
            assert_eq!(Distance::from_echo_micros(micros), Distance::from_cm(cm));
        }
    }

    #[test]
    fn echo_thread_serves_the_cycle_after_a_timeout() {
        let (hardware, echo_thread) = SimHardware::boot();
        let mut sensor = DistanceSensor::new(
            TriggerPin::default(),
            NoDelay,
            &hardware.clock,
            &hardware.echo,
            SensorConfig::default(),
        );

        for _ in 0..10 {
            hardware.set_target(None);
            assert_eq!(sensor.read_sync(), Err(MeasureError::EchoTimeout));
            hardware.set_target(Some(10));
            assert_eq!(sensor.read_sync(), Ok(Distance::from_cm(10)));
        }

        hardware.shutdown();
        echo_thread.join().unwrap();
    }

    #[test]
    fn trigger_counts_rising_edges_only() {
        let mut pin = TriggerPin::default();
        pin.set_low().unwrap();
        pin.set_high().unwrap();
        pin.set_high().unwrap();
        pin.set_low().unwrap();
        pin.set_high().unwrap();
        assert_eq!(pin.pulses(), 2);
    }
}
