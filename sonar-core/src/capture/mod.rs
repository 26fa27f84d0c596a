//! Echo pulse capture state shared with the edge interrupt.
//!
//! Every field of the capture lives in a single [`CaptureSnapshot`] guarded by a
//! critical-section mutex, so the interrupt and the blocking reader always
//! observe a whole transition. The edge handler timestamps the rising edge,
//! measures the width on the falling edge and stops the clock once the pulse
//! is complete. Edges arriving outside a measurement window are counted and
//! otherwise ignored.

use core::cell::Cell;

use critical_section::Mutex;

use crate::clock::{ExhaustionHandler, HardwareCounter, MonotonicClock, Ticks};

/// Where the capture sits within a trigger cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgePhase {
    /// No measurement in flight; edges are spurious.
    Idle,
    /// Armed: the next edge starts the pulse.
    AwaitingStart,
    /// Rising edge seen; the next edge ends the pulse.
    AwaitingEnd,
    /// Pulse width captured and waiting to be consumed.
    Complete,
}

/// Atomically visible copy of the capture state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CaptureSnapshot {
    pub capture_start: Ticks,
    pub pulse_width: Ticks,
    pub phase: EdgePhase,
    pub spurious_edges: u16,
    /// Bumped by every [`EchoCapture::arm`]; wraps.
    pub cycle: u16,
}

impl CaptureSnapshot {
    const IDLE: Self = Self {
        capture_start: 0,
        pulse_width: 0,
        phase: EdgePhase::Idle,
        spurious_edges: 0,
        cycle: 0,
    };

    /// Returns `true` when the next edge will be treated as a start edge.
    pub const fn armed(&self) -> bool {
        matches!(self.phase, EdgePhase::AwaitingStart)
    }

    /// Returns `true` once the falling edge has been captured.
    pub const fn capture_complete(&self) -> bool {
        matches!(self.phase, EdgePhase::Complete)
    }

    /// Returns `true` while cycle `cycle` is still waiting for an edge.
    pub const fn in_flight(&self, cycle: u16) -> bool {
        self.cycle == cycle && matches!(self.phase, EdgePhase::AwaitingStart | EdgePhase::AwaitingEnd)
    }
}

/// What the edge handler did with an edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeEvent {
    Started(Ticks),
    Completed(Ticks),
    Ignored,
}

/// Capture state owned by the distance sensor and its edge interrupt.
pub struct EchoCapture {
    state: Mutex<Cell<CaptureSnapshot>>,
}

impl EchoCapture {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(CaptureSnapshot::IDLE)),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut CaptureSnapshot) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut snapshot = cell.get();
            let result = f(&mut snapshot);
            cell.set(snapshot);
            result
        })
    }

    /// Reads the whole capture state at once.
    pub fn snapshot(&self) -> CaptureSnapshot {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    /// Clears the completion flag and any previous width.
    pub fn clear(&self) {
        self.update(|state| {
            state.phase = EdgePhase::Idle;
            state.capture_start = 0;
            state.pulse_width = 0;
        });
    }

    /// Marks the next edge as the start of the echo pulse.
    /// Starts a new trigger cycle and returns its number.
    pub fn arm(&self) -> u16 {
        self.update(|state| {
            state.phase = EdgePhase::AwaitingStart;
            state.cycle = state.cycle.wrapping_add(1);
            state.cycle
        })
    }

    /// Closes the measurement window.
    ///
    /// Returns the pulse width when the falling edge raced the caller and the
    /// capture completed anyway.
    pub fn abandon(&self) -> Option<Ticks> {
        self.update(|state| match state.phase {
            EdgePhase::Complete => Some(state.pulse_width),
            _ => {
                state.phase = EdgePhase::Idle;
                None
            }
        })
    }

    pub fn is_armed(&self) -> bool {
        self.snapshot().armed()
    }

    /// Number of the most recently armed trigger cycle.
    pub fn cycle(&self) -> u16 {
        self.snapshot().cycle
    }

    pub fn is_complete(&self) -> bool {
        self.snapshot().capture_complete()
    }

    /// Captured pulse width, valid only once the capture is complete.
    pub fn pulse_width(&self) -> Option<Ticks> {
        let snapshot = self.snapshot();
        snapshot
            .capture_complete()
            .then_some(snapshot.pulse_width)
    }

    /// Number of edges seen while no measurement was in flight.
    pub fn spurious_edges(&self) -> u16 {
        self.snapshot().spurious_edges
    }

    /// Edge interrupt entry point.
    ///
    /// Stops `clock` after the falling edge so the next trigger starts from zero.
    pub fn on_edge<C, H>(&self, clock: &MonotonicClock<C, H>) -> EdgeEvent
    where
        C: HardwareCounter,
        H: ExhaustionHandler,
    {
        let now = clock.now();
        let event = self.update(|state| match state.phase {
            EdgePhase::AwaitingStart => {
                state.capture_start = now;
                state.phase = EdgePhase::AwaitingEnd;
                EdgeEvent::Started(now)
            }
            EdgePhase::AwaitingEnd => {
                state.pulse_width = now.saturating_sub(state.capture_start);
                state.phase = EdgePhase::Complete;
                EdgeEvent::Completed(state.pulse_width)
            }
            EdgePhase::Idle | EdgePhase::Complete => {
                state.spurious_edges = state.spurious_edges.saturating_add(1);
                EdgeEvent::Ignored
            }
        });

        if matches!(event, EdgeEvent::Completed(_)) {
            clock.stop();
        }

        event
    }
}

impl Default for EchoCapture {
    fn default() -> Self {
        Self::new()
    }
}
