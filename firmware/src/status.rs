#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics mirror the control loop so debug probes and the
//! interrupt handlers can observe it without touching the loop itself.

use portable_atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};
use sonar_core::control::ControlState;
use sonar_core::sensor::Distance;

/// Marks "no reading yet".
const NO_READING: u16 = u16::MAX;

static LAST_DISTANCE_CM: AtomicU16 = AtomicU16::new(NO_READING);
static LAST_THRESHOLD_CM: AtomicU16 = AtomicU16::new(NO_READING);
static CONTROL_STATE: AtomicU8 = AtomicU8::new(0);
static RELAY_TOGGLES: AtomicU32 = AtomicU32::new(0);
static ECHO_TIMEOUTS: AtomicU32 = AtomicU32::new(0);

const fn encode_state(state: ControlState) -> u8 {
    match state {
        ControlState::Idle => 0,
        ControlState::Triggered => 1,
        ControlState::Disabled => 2,
    }
}

const fn decode_state(raw: u8) -> ControlState {
    match raw {
        1 => ControlState::Triggered,
        2 => ControlState::Disabled,
        _ => ControlState::Idle,
    }
}

fn decode_distance(raw: u16) -> Option<Distance> {
    (raw != NO_READING).then(|| Distance::from_cm(raw))
}

/// Stores the last distance reading and the threshold it was compared with.
pub fn record_reading(distance: Distance, threshold: Distance) {
    LAST_DISTANCE_CM.store(distance.as_cm().min(NO_READING - 1), Ordering::Relaxed);
    LAST_THRESHOLD_CM.store(threshold.as_cm(), Ordering::Relaxed);
}

pub fn record_state(state: ControlState) {
    CONTROL_STATE.store(encode_state(state), Ordering::Relaxed);
}

pub fn record_relay_toggle() {
    RELAY_TOGGLES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_echo_timeout() {
    ECHO_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the status atomics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub state: ControlState,
    pub last_distance: Option<Distance>,
    pub last_threshold: Option<Distance>,
    pub relay_toggles: u32,
    pub echo_timeouts: u32,
}

pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        state: decode_state(CONTROL_STATE.load(Ordering::Relaxed)),
        last_distance: decode_distance(LAST_DISTANCE_CM.load(Ordering::Relaxed)),
        last_threshold: decode_distance(LAST_THRESHOLD_CM.load(Ordering::Relaxed)),
        relay_toggles: RELAY_TOGGLES.load(Ordering::Relaxed),
        echo_timeouts: ECHO_TIMEOUTS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encoding_round_trips() {
        for state in [
            ControlState::Idle,
            ControlState::Triggered,
            ControlState::Disabled,
        ] {
            assert_eq!(decode_state(encode_state(state)), state);
        }
    }

    #[test]
    fn missing_reading_decodes_to_none() {
        assert_eq!(decode_distance(NO_READING), None);
        assert_eq!(decode_distance(31), Some(Distance::from_cm(31)));
    }

    #[test]
    fn relay_toggles_accumulate() {
        let before = snapshot().relay_toggles;
        record_relay_toggle();
        record_relay_toggle();
        assert!(snapshot().relay_toggles >= before + 2);
    }
}
