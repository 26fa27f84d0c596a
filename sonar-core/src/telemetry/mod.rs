//! Control-loop telemetry shared by firmware and host targets.
//!
//! Records land in a fixed-size ring so the firmware can log them over defmt
//! and the emulator can replay them, without either side allocating.

#![cfg_attr(not(test), allow(dead_code))]

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::control::ControlState;
use crate::sensor::Distance;

/// Identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Discriminated telemetry events emitted by the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    StateEntered(ControlState),
    Detection,
    ManualOverride,
    RelayToggled,
    EchoTimeout,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::StateEntered(state) => write!(f, "state-entered {state}"),
            TelemetryEventKind::Detection => f.write_str("detection"),
            TelemetryEventKind::ManualOverride => f.write_str("manual-override"),
            TelemetryEventKind::RelayToggled => f.write_str("relay-toggled"),
            TelemetryEventKind::EchoTimeout => f.write_str("echo-timeout"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// Sensor reading compared against the threshold at the time.
    Reading(ReadingTelemetry),
}

/// Distance reading payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadingTelemetry {
    pub distance: Distance,
    pub threshold: Distance,
}

impl ReadingTelemetry {
    pub const fn new(distance: Distance, threshold: Distance) -> Self {
        Self {
            distance,
            threshold,
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive; doubles as a total count.
    pub fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        details: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }

    pub fn record_state_entered(&mut self, state: ControlState, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::StateEntered(state),
            TelemetryPayload::None,
            timestamp,
        )
    }

    /// Records a reading that crossed the threshold.
    pub fn record_detection(
        &mut self,
        distance: Distance,
        threshold: Distance,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::Detection,
            TelemetryPayload::Reading(ReadingTelemetry::new(distance, threshold)),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
