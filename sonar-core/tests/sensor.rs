mod common;

use std::thread;

use common::{CountingHandler, MockCounter, RecordingDelay, RecordingPin};
use sonar_core::capture::{EchoCapture, EdgeEvent, EdgePhase};
use sonar_core::clock::{ClockConfig, MonotonicClock};
use sonar_core::sensor::{Distance, DistanceReader, DistanceSensor, MeasureError, SensorConfig};

type TestClock = MonotonicClock<MockCounter, CountingHandler>;

fn sensor<'a>(
    clock: &'a TestClock,
    capture: &'a EchoCapture,
) -> DistanceSensor<'a, RecordingPin, RecordingDelay, MockCounter, CountingHandler> {
    DistanceSensor::new(
        RecordingPin::default(),
        RecordingDelay::default(),
        clock,
        capture,
        SensorConfig::default(),
    )
}

/// Plays the echo line from another thread: waits for the sensor to arm the
/// capture, then delivers a rising edge at `start` and a falling edge at `end`.
fn echo_pulse(clock: &TestClock, capture: &EchoCapture, start: u32, end: u32) -> EdgeEvent {
    while !capture.is_armed() {
        thread::yield_now();
    }

    clock.counter().set(start);
    assert_eq!(capture.on_edge(clock), EdgeEvent::Started(start));

    clock.counter().set(end);
    capture.on_edge(clock)
}

#[test]
fn read_sync_converts_echo_width_to_centimetres() {
    let clock = MonotonicClock::new(MockCounter::new(), CountingHandler::new());
    clock.configure(ClockConfig::default());
    let capture = EchoCapture::new();
    let mut sensor = sensor(&clock, &capture);

    let (reading, edge) = thread::scope(|scope| {
        let echo = scope.spawn(|| echo_pulse(&clock, &capture, 100, 1_864));
        let reading = sensor.read_sync();
        (reading, echo.join().unwrap())
    });

    assert_eq!(edge, EdgeEvent::Completed(1_764));
    assert_eq!(reading, Ok(Distance::from_cm(29)));
    assert!(!clock.is_running(), "falling edge must stop the clock");
    assert_eq!(clock.now(), 0);
}

#[test]
fn echo_that_crosses_an_overflow_is_measured_in_full() {
    let clock = MonotonicClock::new(MockCounter::new(), CountingHandler::new());
    let capture = EchoCapture::new();
    let mut sensor = sensor(&clock, &capture);

    let reading = thread::scope(|scope| {
        scope.spawn(|| {
            while !capture.is_armed() {
                thread::yield_now();
            }
            clock.counter().set(200);
            capture.on_edge(&clock);
            for _ in 0..4 {
                clock.on_overflow();
            }
            clock.counter().set(80);
            capture.on_edge(&clock);
        });
        sensor.read_distance()
    });

    // 4 * 255 + 80 - 200 = 900 µs.
    assert_eq!(reading, Ok(Distance::from_cm(15)));
}

#[test]
fn missing_echo_times_out_and_closes_the_window() {
    let clock = MonotonicClock::new(MockCounter::auto_advance(1_000), CountingHandler::new());
    let capture = EchoCapture::new();
    let mut sensor = sensor(&clock, &capture);

    assert_eq!(sensor.read_sync(), Err(MeasureError::EchoTimeout));
    assert_eq!(capture.snapshot().phase, EdgePhase::Idle);
    assert!(!clock.is_running());

    // A late edge after the timeout is not mistaken for a new pulse.
    assert_eq!(capture.on_edge(&clock), EdgeEvent::Ignored);
    assert_eq!(capture.spurious_edges(), 1);
}

#[test]
fn reading_after_a_timeout_measures_the_new_echo() {
    let clock = MonotonicClock::new(MockCounter::new(), CountingHandler::new());
    clock.configure(ClockConfig::default());
    let capture = EchoCapture::new();
    let mut sensor = sensor(&clock, &capture);

    thread::scope(|scope| {
        let echo = scope.spawn(|| {
            while !capture.is_armed() {
                thread::yield_now();
            }
            // No echo: let the timer run until the reader closes the window.
            let silent = capture.cycle();
            while critical_section::with(|_| {
                let open = capture.snapshot().in_flight(silent);
                if open {
                    clock.on_overflow();
                }
                open
            }) {
                thread::yield_now();
            }
            while capture.cycle() == silent || !capture.is_armed() {
                thread::yield_now();
            }
            echo_pulse(&clock, &capture, 100, 1_864)
        });

        assert_eq!(sensor.read_sync(), Err(MeasureError::EchoTimeout));
        assert_eq!(sensor.read_sync(), Ok(Distance::from_cm(29)));
        assert_eq!(echo.join().unwrap(), EdgeEvent::Completed(1_764));
    });

    assert_eq!(capture.spurious_edges(), 0);
}

#[test]
fn trigger_pulse_drives_low_high_low_with_ten_microsecond_phases() {
    let clock = MonotonicClock::new(MockCounter::auto_advance(5_000), CountingHandler::new());
    let capture = EchoCapture::new();
    let mut sensor = sensor(&clock, &capture);

    let _ = sensor.read_sync();
    let (pin, delay) = sensor.release();

    assert_eq!(pin.levels, vec![false, true, false]);
    assert_eq!(delay.calls, 2);
    assert_eq!(delay.total_ns, 20_000);
}

#[test]
fn stray_edges_before_trigger_do_not_corrupt_the_next_reading() {
    let clock = MonotonicClock::new(MockCounter::new(), CountingHandler::new());
    let capture = EchoCapture::new();

    assert_eq!(capture.on_edge(&clock), EdgeEvent::Ignored);
    assert_eq!(capture.on_edge(&clock), EdgeEvent::Ignored);

    let mut sensor = sensor(&clock, &capture);
    let reading = thread::scope(|scope| {
        scope.spawn(|| echo_pulse(&clock, &capture, 10, 1_010));
        sensor.read_sync()
    });

    assert_eq!(reading, Ok(Distance::from_cm(17)));
    assert_eq!(capture.spurious_edges(), 2);
}

#[test]
fn prescaled_ticks_are_converted_before_scaling() {
    let clock = MonotonicClock::new(MockCounter::new(), CountingHandler::new());
    clock.configure(ClockConfig::new(16_000_000));
    let capture = EchoCapture::new();
    let sensor = sensor(&clock, &capture);

    // 2 MHz ticks: 3_528 ticks = 1_764 µs.
    assert_eq!(sensor.distance_for(3_528), Distance::from_cm(29));
    assert_eq!(sensor.config(), SensorConfig::new(50_000));
}
