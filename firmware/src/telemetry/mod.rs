//! Logging hooks for control loop outcomes.
//!
//! Every step result is mirrored into the status atomics and, when it marks a
//! transition or a fault, logged over defmt (or stdout on the host) for
//! bring-up.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use sonar_core::control::{ControlError, ControlState, StepOutcome, TriggerCause};

use crate::status;
use crate::time::FirmwareInstant;

/// Records a step result in the status block and logs notable outcomes.
pub fn observe_step(outcome: &Result<StepOutcome, ControlError>, state: ControlState, now: FirmwareInstant) {
    status::record_state(state);
    let timestamp_us = now.as_micros();

    match outcome {
        Ok(StepOutcome::Waiting) => {}
        Ok(StepOutcome::Clear {
            distance,
            threshold,
        }) => status::record_reading(*distance, *threshold),
        Ok(StepOutcome::EchoTimeout) => {
            status::record_echo_timeout();
            emit_warn("control: echo timeout", timestamp_us);
        }
        Ok(StepOutcome::Triggered(TriggerCause::Proximity {
            distance,
            threshold,
        })) => {
            status::record_reading(*distance, *threshold);
            emit_detection(distance.as_cm(), threshold.as_cm(), timestamp_us);
        }
        Ok(StepOutcome::Triggered(TriggerCause::ManualOverride)) => {
            emit_info("control: manual override", timestamp_us);
        }
        Ok(StepOutcome::RelayToggled) => {
            status::record_relay_toggle();
            emit_info("control: relay toggled", timestamp_us);
        }
        Ok(StepOutcome::Rearmed) => emit_info("control: rearmed", timestamp_us),
        Err(err) => emit_error(err, timestamp_us),
    }
}

#[cfg(target_os = "none")]
fn emit_info(message: &'static str, timestamp_us: u64) {
    defmt::info!("{} t={}us", message, timestamp_us);
}

#[cfg(target_os = "none")]
fn emit_warn(message: &'static str, timestamp_us: u64) {
    defmt::warn!("{} t={}us", message, timestamp_us);
}

#[cfg(target_os = "none")]
fn emit_detection(distance_cm: u16, threshold_cm: u16, timestamp_us: u64) {
    defmt::info!(
        "control: detection {}cm < {}cm t={}us",
        distance_cm,
        threshold_cm,
        timestamp_us
    );
}

#[cfg(target_os = "none")]
fn emit_error(err: &ControlError, timestamp_us: u64) {
    defmt::error!(
        "control: step failed: {} t={}us",
        defmt::Display2Format(err),
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_info(message: &'static str, timestamp_us: u64) {
    println!("{message} t={timestamp_us}us");
}

#[cfg(not(target_os = "none"))]
fn emit_warn(message: &'static str, timestamp_us: u64) {
    println!("{message} t={timestamp_us}us");
}

#[cfg(not(target_os = "none"))]
fn emit_detection(distance_cm: u16, threshold_cm: u16, timestamp_us: u64) {
    println!("control: detection {distance_cm}cm < {threshold_cm}cm t={timestamp_us}us");
}

#[cfg(not(target_os = "none"))]
fn emit_error(err: &ControlError, timestamp_us: u64) {
    println!("control: step failed: {err} t={timestamp_us}us");
}
