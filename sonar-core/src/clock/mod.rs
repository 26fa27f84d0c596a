//! Wide monotonic tick counter built on a narrow free-running hardware timer.
//!
//! The hardware register only spans a handful of bits, so every wrap raises an
//! overflow interrupt that folds one [`HardwareCounter::QUANTUM`] into a 32-bit
//! software count. Readers combine both halves inside a critical section so an
//! overflow can never tear the value. When the software count is about to run
//! out of range the clock hands control to an injected [`ExhaustionHandler`]
//! instead of wrapping.

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Raw timer ticks as reported by [`MonotonicClock::now`].
pub type Ticks = u32;

/// Prescale factor applied to the timer input clock unless overridden.
pub const DEFAULT_PRESCALE: u16 = 8;

/// Input clock of the reference board (8 MHz core, 1 µs ticks after prescale).
pub const REFERENCE_INPUT_HZ: u32 = 8_000_000;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Timer configuration captured by [`MonotonicClock::configure`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockConfig {
    input_hz: u32,
    prescale: u16,
}

impl ClockConfig {
    /// Creates a configuration for the given timer input frequency.
    pub const fn new(input_hz: u32) -> Self {
        Self {
            input_hz,
            prescale: DEFAULT_PRESCALE,
        }
    }

    /// Overrides the prescale factor. Zero is treated as divide-by-one.
    #[must_use]
    pub const fn with_prescale(mut self, prescale: u16) -> Self {
        self.prescale = if prescale == 0 { 1 } else { prescale };
        self
    }

    pub const fn input_hz(&self) -> u32 {
        self.input_hz
    }

    pub const fn prescale(&self) -> u16 {
        self.prescale
    }

    /// Tick rate after the prescaler.
    pub const fn tick_hz(&self) -> u32 {
        self.input_hz / self.prescale as u32
    }

    /// Converts a tick count into microseconds, truncating.
    pub fn ticks_to_micros(&self, ticks: Ticks) -> u64 {
        let tick_hz = u64::from(self.tick_hz().max(1));
        u64::from(ticks) * MICROS_PER_SECOND / tick_hz
    }

    /// Converts microseconds into ticks, saturating at [`Ticks::MAX`].
    pub fn micros_to_ticks(&self, micros: u64) -> Ticks {
        let ticks = micros.saturating_mul(u64::from(self.tick_hz())) / MICROS_PER_SECOND;
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new(REFERENCE_INPUT_HZ)
    }
}

/// Narrow free-running counter register backing a [`MonotonicClock`].
///
/// Implementations talk to memory-mapped registers, so every method takes
/// `&self`; the clock is shared between the main loop and interrupt handlers.
pub trait HardwareCounter {
    /// Ticks added to the wide count on every overflow (the register's range).
    const QUANTUM: u32;

    /// Unmasks the overflow interrupt source.
    fn enable_overflow_interrupt(&self);

    /// Starts counting with the given prescale factor.
    ///
    /// Must not raise an overflow interrupt of its own; only a register wrap
    /// may reach [`MonotonicClock::on_overflow`].
    fn start(&self, prescale: u16);

    /// Stops counting without touching the register value.
    fn halt(&self);

    /// Zeroes the register.
    fn reset(&self);

    /// Current register value.
    fn count(&self) -> u32;
}

/// Recovery action invoked once the wide count can no longer advance.
///
/// The firmware implementation arms the watchdog and never returns.
pub trait ExhaustionHandler {
    fn on_exhaustion(&self);
}

/// Overflow-extended monotonic clock.
pub struct MonotonicClock<C, H> {
    counter: C,
    exhaustion: H,
    extended_ticks: AtomicU32,
    running: AtomicBool,
    config: Mutex<Cell<Option<ClockConfig>>>,
}

impl<C, H> MonotonicClock<C, H>
where
    C: HardwareCounter,
    H: ExhaustionHandler,
{
    /// Largest wide count that can still absorb another quantum.
    const SATURATION_LIMIT: u32 = u32::MAX - C::QUANTUM;

    /// Creates a stopped, unconfigured clock.
    pub const fn new(counter: C, exhaustion: H) -> Self {
        Self {
            counter,
            exhaustion,
            extended_ticks: AtomicU32::new(0),
            running: AtomicBool::new(false),
            config: Mutex::new(Cell::new(None)),
        }
    }

    /// One-time setup: records the timer configuration and unmasks overflows.
    pub fn configure(&self, config: ClockConfig) {
        critical_section::with(|cs| self.config.borrow(cs).set(Some(config)));
        self.counter.enable_overflow_interrupt();
    }

    /// Returns the active configuration, falling back to the reference board.
    pub fn config(&self) -> ClockConfig {
        critical_section::with(|cs| self.config.borrow(cs).get()).unwrap_or_default()
    }

    /// Returns `true` once [`configure`](Self::configure) has been called.
    pub fn is_configured(&self) -> bool {
        critical_section::with(|cs| self.config.borrow(cs).get()).is_some()
    }

    /// Enables the counter with the configured prescale factor.
    pub fn start(&self) {
        self.counter.start(self.config().prescale());
        self.running.store(true, Ordering::Release);
    }

    /// Disables the counter and clears both halves of the count.
    pub fn stop(&self) {
        critical_section::with(|_| {
            self.counter.halt();
            self.counter.reset();
            self.extended_ticks.store(0, Ordering::Relaxed);
        });
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current time: wide count plus live register, read with interrupts masked.
    pub fn now(&self) -> Ticks {
        critical_section::with(|_| {
            let extended = self.extended_ticks.load(Ordering::Relaxed);
            extended.saturating_add(self.counter.count())
        })
    }

    /// Wide count accumulated from overflows alone.
    pub fn extended_ticks(&self) -> Ticks {
        self.extended_ticks.load(Ordering::Relaxed)
    }

    /// Overflow interrupt entry point.
    ///
    /// Must only be called from the timer overflow handler; it is the sole
    /// writer of the wide count apart from [`stop`](Self::stop).
    pub fn on_overflow(&self) {
        let ticks = self.extended_ticks.load(Ordering::Relaxed);
        if ticks > Self::SATURATION_LIMIT {
            self.exhaustion.on_exhaustion();
        } else {
            self.extended_ticks
                .store(ticks + C::QUANTUM, Ordering::Relaxed);
        }
    }

    /// Converts a tick span into microseconds using the active configuration.
    pub fn ticks_to_micros(&self, ticks: Ticks) -> u64 {
        self.config().ticks_to_micros(ticks)
    }

    /// Borrow of the underlying counter register.
    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Borrow of the injected exhaustion handler.
    pub fn exhaustion_handler(&self) -> &H {
        &self.exhaustion
    }
}
