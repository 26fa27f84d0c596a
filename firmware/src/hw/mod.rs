//! STM32G0 bindings for the measurement clock and echo capture.
//!
//! TIM3 runs as a free 16-bit up-counter whose update interrupt extends the
//! shared [`MonotonicClock`]; EXTI line 0 (PA0) delivers both echo edges to
//! [`EchoCapture::on_edge`]. The two statics below are the only state the
//! interrupt handlers touch.

#![cfg(target_os = "none")]

pub mod adc;
pub mod watchdog;

use embassy_stm32::interrupt;
use embassy_stm32::interrupt::InterruptExt;
use embassy_stm32::pac;
use embassy_stm32::pac::TIM3;
use embassy_stm32::pac::timer::vals::Urs;
use sonar_core::capture::EchoCapture;
use sonar_core::clock::{HardwareCounter, MonotonicClock};

use self::watchdog::WatchdogReset;

/// Measurement clock shared between the control task and the TIM3 overflow
/// interrupt.
pub static CLOCK: MonotonicClock<Tim3Counter, WatchdogReset> =
    MonotonicClock::new(Tim3Counter, WatchdogReset::new());

/// Echo capture shared between the control task and the EXTI interrupt.
pub static ECHO: EchoCapture = EchoCapture::new();

/// EXTI line and port selector for the echo input (PA0).
const ECHO_LINE: usize = 0;
const ECHO_PORT_A: u8 = 0;

/// TIM3 driven through raw register access.
pub struct Tim3Counter;

impl HardwareCounter for Tim3Counter {
    const QUANTUM: u32 = 1 << 16;

    fn enable_overflow_interrupt(&self) {
        pac::RCC.apbenr1().modify(|w| w.set_tim3en(true));
        TIM3.arr().write(|w| w.set_arr(u16::MAX));
        // Only a real wrap may raise UIF; the UG in `start` would otherwise
        // reach `TIM3_TIM4` as an overflow.
        TIM3.cr1().modify(|w| w.set_urs(Urs::COUNTER_ONLY));
        TIM3.dier().modify(|w| w.set_uie(true));
        unsafe { interrupt::TIM3_TIM4.enable() };
    }

    fn start(&self, prescale: u16) {
        TIM3.psc().write_value(prescale.saturating_sub(1));
        // Latch the prescaler now.
        TIM3.egr().write(|w| w.set_ug(true));
        TIM3.cr1().modify(|w| w.set_cen(true));
    }

    fn halt(&self) {
        TIM3.cr1().modify(|w| w.set_cen(false));
    }

    fn reset(&self) {
        TIM3.cnt().write(|w| w.set_cnt(0));
        TIM3.sr().modify(|w| w.set_uif(false));
    }

    fn count(&self) -> u32 {
        u32::from(TIM3.cnt().read().cnt())
    }
}

/// Routes PA0 to EXTI line 0 on both edges and unmasks the interrupt.
///
/// The pin itself must already be configured as an input.
pub fn configure_echo_interrupt() {
    pac::EXTI
        .exticr(ECHO_LINE / 4)
        .modify(|w| w.set_exti(ECHO_LINE % 4, ECHO_PORT_A));
    pac::EXTI.rtsr(0).modify(|w| w.set_line(ECHO_LINE, true));
    pac::EXTI.ftsr(0).modify(|w| w.set_line(ECHO_LINE, true));
    pac::EXTI.imr(0).modify(|w| w.set_line(ECHO_LINE, true));
    unsafe { interrupt::EXTI0_1.enable() };
}

#[interrupt]
fn TIM3_TIM4() {
    if TIM3.sr().read().uif() {
        TIM3.sr().modify(|w| w.set_uif(false));
        CLOCK.on_overflow();
    }
}

#[interrupt]
fn EXTI0_1() {
    pac::EXTI.rpr(0).write(|w| w.set_line(ECHO_LINE, true));
    pac::EXTI.fpr(0).write(|w| w.set_line(ECHO_LINE, true));
    ECHO.on_edge(&CLOCK);
}
