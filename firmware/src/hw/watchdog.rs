//! Watchdog-driven reset used when the measurement clock runs out of range.

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use sonar_core::clock::ExhaustionHandler;

/// Shortest practical IWDG window; the MCU restarts soon after exhaustion.
pub const WATCHDOG_TIMEOUT_US: u32 = 15_000;

/// Holds the (not yet started) IWDG until the clock saturates.
pub struct WatchdogReset {
    watchdog: Mutex<RefCell<Option<IndependentWatchdog<'static, IWDG>>>>,
}

impl WatchdogReset {
    pub const fn new() -> Self {
        Self {
            watchdog: Mutex::new(RefCell::new(None)),
        }
    }

    /// Hands over the watchdog; it stays stopped until exhaustion.
    pub fn install(&self, watchdog: IndependentWatchdog<'static, IWDG>) {
        critical_section::with(|cs| self.watchdog.borrow(cs).replace(Some(watchdog)));
    }
}

impl ExhaustionHandler for WatchdogReset {
    fn on_exhaustion(&self) {
        defmt::warn!("clock: tick count exhausted, resetting");

        let watchdog = critical_section::with(|cs| self.watchdog.borrow(cs).take());
        if let Some(mut watchdog) = watchdog {
            watchdog.unleash();
            loop {
                cortex_m::asm::nop();
            }
        }

        cortex_m::peripheral::SCB::sys_reset();
    }
}
