use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_time::Delay;
use sonar_core::clock::ClockConfig;
use sonar_core::control::{ControlLoop, ControlTiming};
use sonar_core::sensor::{DEFAULT_ECHO_TIMEOUT_US, DistanceSensor, SensorConfig};

use crate::hw::{self, CLOCK, ECHO};
use crate::hw::adc::PotThreshold;
use crate::hw::watchdog::WATCHDOG_TIMEOUT_US;
use crate::time::EmbassyClock;

mod control_task;

/// TIM3 kernel clock with the default HSI16 tree.
const TIMER_INPUT_HZ: u32 = 16_000_000;
/// Divides the timer clock down to 1 µs ticks.
const TIMER_PRESCALE: u16 = 16;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PB0,
        PB1,
        PB3,
        ADC1,
        IWDG,
        ..
    } = hal::init(config);

    CLOCK
        .exhaustion_handler()
        .install(IndependentWatchdog::new(IWDG, WATCHDOG_TIMEOUT_US));
    let clock_config = ClockConfig::new(TIMER_INPUT_HZ).with_prescale(TIMER_PRESCALE);
    CLOCK.configure(clock_config);

    // Kept alive for the lifetime of the task so PA0 stays an input.
    let echo = Input::new(PA0, Pull::Down);
    hw::configure_echo_interrupt();

    let relay = Output::new(PB0, Level::Low, Speed::Low);
    let trigger = Output::new(PB1, Level::Low, Speed::Low);
    let button = Input::new(PB3, Pull::Up);
    let threshold = PotThreshold::new(Adc::new(ADC1), PA1);

    let sensor_config =
        SensorConfig::new(clock_config.micros_to_ticks(u64::from(DEFAULT_ECHO_TIMEOUT_US)));
    let sensor = DistanceSensor::new(trigger, Delay, &CLOCK, &ECHO, sensor_config);
    let control = ControlLoop::new(
        sensor,
        threshold,
        relay,
        button,
        EmbassyClock,
        ControlTiming::default(),
    );

    defmt::info!(
        "sonar-relay: clock {} Hz, echo timeout {} ticks",
        clock_config.tick_hz(),
        sensor_config.echo_timeout_ticks
    );

    spawner
        .spawn(control_task::run(control, echo))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
