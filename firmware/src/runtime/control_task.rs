use embassy_stm32::gpio::{Input, Output};
use embassy_time::{Delay, Duration, Timer};
use sonar_core::control::{ControlLoop, StepOutcome, TimeSource};
use sonar_core::sensor::DistanceSensor;

use crate::hw::adc::PotThreshold;
use crate::hw::watchdog::WatchdogReset;
use crate::hw::Tim3Counter;
use crate::telemetry;
use crate::time::EmbassyClock;

/// Sleep between evaluations while a gate is pending.
const GATE_POLL: Duration = Duration::from_millis(1);
/// Back-off after a pin fault so the log is not flooded.
const FAULT_BACKOFF: Duration = Duration::from_millis(100);

pub type SonarSensor = DistanceSensor<'static, Output<'static>, Delay, Tim3Counter, WatchdogReset>;

pub type SonarControl =
    ControlLoop<SonarSensor, PotThreshold<'static>, Output<'static>, Input<'static>, EmbassyClock>;

#[embassy_executor::task]
pub async fn run(mut control: SonarControl, _echo: Input<'static>) -> ! {
    defmt::info!("control: loop started");

    loop {
        let outcome = control.step();
        telemetry::observe_step(&outcome, control.state(), control.time().now());

        match outcome {
            Ok(StepOutcome::Waiting) => Timer::after(GATE_POLL).await,
            Ok(_) => embassy_futures::yield_now().await,
            Err(_) => Timer::after(FAULT_BACKOFF).await,
        }
    }
}
