#![no_std]

#[cfg(test)]
extern crate std;

// Shared logic for the ultrasonic proximity relay.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library; hardware access enters through `embedded-hal` traits
// and the small register traits defined in `clock`.

pub mod capture;
pub mod clock;
pub mod control;
pub mod sensor;
pub mod telemetry;
pub mod threshold;
