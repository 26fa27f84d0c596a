use std::cell::Cell;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::Add;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use embedded_hal::digital::StatefulOutputPin;
use sonar_core::control::{
    ControlError, ControlLoop, ControlTiming, StepOutcome, TimeSource, TriggerCause,
};
use sonar_core::sensor::{DistanceSensor, SensorConfig};
use sonar_core::telemetry::{TelemetryPayload, TelemetryRecord};
use sonar_core::threshold::threshold_from_raw;

use crate::hardware::{
    MAX_RANGE_CM, NoDelay, SimButton, SimCounter, SimHardware, SimPot, SimRelay, SimReset,
    TriggerPin,
};

/// Potentiometer position at power-up (31 cm threshold).
const DEFAULT_POT_RAW: u16 = 512;
const MAX_POT_RAW: u16 = 1_023;
const MAX_ADVANCE_MS: u64 = 600_000;
const MAX_STEPS: u32 = 1_000;
/// Outcomes handled back-to-back at a single instant before time moves on.
const MAX_STEPS_PER_INSTANT: usize = 4;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "target",
        "target <cm>|none              - place or remove the obstacle",
    ),
    (
        "pot",
        "pot <0-1023>                  - set the threshold potentiometer",
    ),
    (
        "press",
        "press | release               - hold or release the override button",
    ),
    (
        "advance",
        "advance <ms>                  - run the control loop for simulated time",
    ),
    (
        "step",
        "step [count]                  - evaluate the loop without moving time",
    ),
    (
        "measure",
        "measure                       - take one blocking distance reading",
    ),
    (
        "saturate",
        "saturate                      - overflow the clock until it resets",
    ),
    (
        "status",
        "status                        - display loop and board state",
    ),
    (
        "history",
        "history                       - list recorded telemetry",
    ),
    (
        "help",
        "help [topic]                  - show help for a command",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Detection,
    Manual,
    Timeout,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Detection => "transcripts/emulator-detection.log",
            TranscriptProfile::Manual => "transcripts/emulator-manual.log",
            TranscriptProfile::Timeout => "transcripts/emulator-timeout.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Detection => "Sonar relay emulator detection transcript",
            TranscriptProfile::Manual => "Sonar relay emulator manual override transcript",
            TranscriptProfile::Timeout => "Sonar relay emulator echo timeout transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("detection") {
            Ok(Self::Detection)
        } else if tag.eq_ignore_ascii_case("manual") {
            Ok(Self::Manual)
        } else if tag.eq_ignore_ascii_case("timeout") {
            Ok(Self::Timeout)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// Millisecond instant on the simulated timeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(u64);

impl SimInstant {
    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = SimInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        SimInstant(self.0.saturating_add(millis))
    }
}

impl fmt::Display for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ms", self.0)
    }
}

/// Simulated time that only moves when the session advances it.
pub struct VirtualTime(Cell<u64>);

impl VirtualTime {
    fn starting_at(millis: u64) -> Self {
        Self(Cell::new(millis))
    }

    fn advance_ms(&self, millis: u64) {
        self.0.set(self.0.get().saturating_add(millis));
    }
}

impl TimeSource for VirtualTime {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.0.get())
    }
}

type SimSensor = DistanceSensor<'static, TriggerPin, NoDelay, SimCounter, SimReset>;
type SimControl = ControlLoop<SimSensor, SimPot, SimRelay, SimButton, VirtualTime>;

#[derive(Debug)]
enum CommandError {
    Unknown(String),
    Syntax(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(command) => write!(f, "unknown command `{command}`"),
            CommandError::Syntax(detail) => write!(f, "syntax {detail}"),
        }
    }
}

pub struct Session {
    hardware: &'static SimHardware,
    echo_thread: Option<JoinHandle<()>>,
    control: SimControl,
    transcript: TranscriptLogger,
    resets_seen: u32,
}

impl Session {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        Ok(Self::with_transcript(transcript))
    }

    fn with_transcript(transcript: TranscriptLogger) -> Self {
        let (hardware, echo_thread) = SimHardware::boot();
        let control = build_control(hardware, DEFAULT_POT_RAW, false, 0);
        Self {
            hardware,
            echo_thread: Some(echo_thread),
            control,
            transcript,
            resets_seen: 0,
        }
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.now();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = match self.execute(trimmed) {
            Ok(lines) => lines,
            Err(err) => vec![format!("ERR {err}")],
        };
        self.record_output(&lines)?;
        Ok(lines)
    }

    fn execute(&mut self, line: &str) -> Result<Vec<String>, CommandError> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Err(CommandError::Syntax(format!("unexpected `{extra}`")));
        }

        match command.as_str() {
            "help" => Ok(handle_help(argument)),
            "target" => self.handle_target(argument),
            "pot" => self.handle_pot(argument),
            "press" => Ok(self.set_button(true)),
            "release" => Ok(self.set_button(false)),
            "advance" => self.handle_advance(argument),
            "step" => self.handle_step(argument),
            "measure" => Ok(self.handle_measure()),
            "saturate" => Ok(self.handle_saturate()),
            "status" => Ok(self.status_lines()),
            "history" => Ok(self.history_lines()),
            _ => Err(CommandError::Unknown(command)),
        }
    }

    fn now(&self) -> SimInstant {
        self.control.time().now()
    }

    fn handle_target(&mut self, argument: Option<&str>) -> Result<Vec<String>, CommandError> {
        let value = argument.ok_or_else(|| CommandError::Syntax("target <cm>|none".into()))?;
        if value.eq_ignore_ascii_case("none") {
            self.hardware.set_target(None);
            return Ok(vec!["target removed".into()]);
        }

        let cm = parse_number::<u16>(value, "target")?;
        self.hardware.set_target(Some(cm));
        let mut lines = vec![format!("target at {cm}cm")];
        if cm > MAX_RANGE_CM {
            lines.push(format!("note: beyond {MAX_RANGE_CM}cm range, no echo will return"));
        }
        Ok(lines)
    }

    fn handle_pot(&mut self, argument: Option<&str>) -> Result<Vec<String>, CommandError> {
        let value = argument.ok_or_else(|| CommandError::Syntax("pot <0-1023>".into()))?;
        let raw = parse_number::<u16>(value, "pot")?;
        if raw > MAX_POT_RAW {
            return Err(CommandError::Syntax(format!("pot {raw} exceeds {MAX_POT_RAW}")));
        }

        self.control.threshold_mut().raw = raw;
        Ok(vec![format!(
            "pot {raw} -> threshold {}",
            threshold_from_raw(raw)
        )])
    }

    fn set_button(&mut self, pressed: bool) -> Vec<String> {
        self.control.manual_mut().pressed = pressed;
        let label = if pressed { "pressed" } else { "released" };
        vec![format!("button {label}")]
    }

    fn handle_advance(&mut self, argument: Option<&str>) -> Result<Vec<String>, CommandError> {
        let value = argument.ok_or_else(|| CommandError::Syntax("advance <ms>".into()))?;
        let millis = parse_number::<u64>(value, "advance")?;
        if millis > MAX_ADVANCE_MS {
            return Err(CommandError::Syntax(format!(
                "advance {millis} exceeds {MAX_ADVANCE_MS}"
            )));
        }

        let mut lines = Vec::new();
        let mut readings = 0_u32;
        let toggles_before = self.control.relay_mut().toggles();
        for _ in 0..millis {
            self.control.time().advance_ms(1);
            readings += self.run_instant(&mut lines);
        }

        let toggles = self.control.relay_mut().toggles() - toggles_before;
        lines.push(format!(
            "advanced {millis}ms to {}: {readings} clear readings, {toggles} relay toggles",
            self.now()
        ));
        Ok(lines)
    }

    fn handle_step(&mut self, argument: Option<&str>) -> Result<Vec<String>, CommandError> {
        let count = match argument {
            Some(value) => parse_number::<u32>(value, "step")?,
            None => 1,
        };
        if count == 0 || count > MAX_STEPS {
            return Err(CommandError::Syntax(format!("step count must be 1..={MAX_STEPS}")));
        }

        let mut lines = Vec::new();
        for _ in 0..count {
            let now = self.now();
            let outcome = self.control.step();
            let line = match &outcome {
                Ok(StepOutcome::Waiting) => format!("t={now} waiting ({})", self.control.state()),
                Ok(StepOutcome::Clear {
                    distance,
                    threshold,
                }) => format!("t={now} clear {distance} >= {threshold}"),
                _ => self
                    .describe_outcome(now, &outcome)
                    .unwrap_or_else(|| format!("t={now} {:?}", outcome)),
            };
            lines.push(line);
        }
        Ok(lines)
    }

    /// Steps until the loop waits at the current instant. Returns the number
    /// of clear readings taken.
    fn run_instant(&mut self, lines: &mut Vec<String>) -> u32 {
        let mut clear = 0;
        for _ in 0..MAX_STEPS_PER_INSTANT {
            let now = self.now();
            let outcome = self.control.step();
            match &outcome {
                Ok(StepOutcome::Waiting) => break,
                Ok(StepOutcome::Clear { .. }) => clear += 1,
                _ => lines.extend(self.describe_outcome(now, &outcome)),
            }
            if matches!(outcome, Ok(StepOutcome::Clear { .. } | StepOutcome::EchoTimeout) | Err(_)) {
                break;
            }
        }
        clear
    }

    fn describe_outcome(
        &mut self,
        now: SimInstant,
        outcome: &Result<StepOutcome, ControlError>,
    ) -> Option<String> {
        let line = match outcome {
            Ok(StepOutcome::Waiting | StepOutcome::Clear { .. }) => return None,
            Ok(StepOutcome::EchoTimeout) => format!("t={now} echo timeout"),
            Ok(StepOutcome::Triggered(TriggerCause::Proximity {
                distance,
                threshold,
            })) => format!("t={now} detection {distance} < {threshold}, triggered"),
            Ok(StepOutcome::Triggered(TriggerCause::ManualOverride)) => {
                format!("t={now} manual override, triggered")
            }
            Ok(StepOutcome::RelayToggled) => {
                let energised = self.control.relay_mut().energised();
                format!("t={now} relay {}", if energised { "on" } else { "off" })
            }
            Ok(StepOutcome::Rearmed) => format!("t={now} rearmed"),
            Err(err) => format!("t={now} ERR {err}"),
        };
        Some(line)
    }

    fn handle_measure(&mut self) -> Vec<String> {
        match self.control.sensor_mut().read_sync() {
            Ok(distance) => vec![format!("distance {distance}")],
            Err(err) => vec![format!("measure failed: {err}")],
        }
    }

    fn handle_saturate(&mut self) -> Vec<String> {
        let overflows = self.hardware.exhaust_clock();
        let mut lines = vec![format!("clock exhausted after {overflows} overflows")];

        let resets = self.hardware.resets();
        if resets > self.resets_seen {
            self.resets_seen = resets;
            self.reboot();
            lines.push(format!("watchdog reset #{resets}, loop restarted in idle"));
        }
        lines
    }

    /// Rebuilds the loop as a power-on would, keeping the analog and button
    /// inputs and the simulated timeline.
    fn reboot(&mut self) {
        let pot = self.control.threshold_mut().raw;
        let pressed = self.control.manual_mut().pressed;
        let now = self.now().as_millis();
        self.control = build_control(self.hardware, pot, pressed, now);
    }

    fn status_lines(&mut self) -> Vec<String> {
        let now = self.now();
        let state = self.control.state();
        let entered = self.control.state_entry_time();
        let pot = self.control.threshold_mut().raw;
        let pressed = self.control.manual_mut().pressed;
        let relay = self.control.relay_mut();
        let energised = relay.is_set_high().unwrap_or_default();
        let toggles = relay.toggles();
        let capture = self.hardware.echo.snapshot();

        vec![
            format!("time {now}"),
            format!("state {state} since {entered}"),
            format!(
                "relay {} (toggles={toggles})",
                if energised { "on" } else { "off" }
            ),
            format!("threshold {} (pot={pot})", threshold_from_raw(pot)),
            match self.hardware.target() {
                Some(cm) => format!("target {cm}cm"),
                None => "target none".into(),
            },
            format!("button {}", if pressed { "pressed" } else { "released" }),
            format!(
                "timer {} spurious-edges={} resets={}",
                if self.hardware.clock.counter().is_enabled() {
                    "running"
                } else {
                    "stopped"
                },
                capture.spurious_edges,
                self.hardware.resets()
            ),
        ]
    }

    fn history_lines(&self) -> Vec<String> {
        let telemetry = self.control.telemetry();
        if telemetry.is_empty() {
            return vec!["history empty".into()];
        }
        telemetry.oldest_first().map(describe_record).collect()
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.now();
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl Session {
    /// Session whose transcript is discarded.
    fn detached() -> Self {
        Self::with_transcript(TranscriptLogger::discard())
    }

    fn state(&self) -> sonar_core::control::ControlState {
        self.control.state()
    }

    fn relay_energised(&mut self) -> bool {
        self.control.relay_mut().energised()
    }

    fn trigger_pulses(&mut self) -> u32 {
        self.control.sensor_mut().trigger().pulses()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hardware.shutdown();
        if let Some(handle) = self.echo_thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

fn build_control(
    hardware: &'static SimHardware,
    pot_raw: u16,
    pressed: bool,
    now_ms: u64,
) -> SimControl {
    let sensor = DistanceSensor::new(
        TriggerPin::default(),
        NoDelay,
        &hardware.clock,
        &hardware.echo,
        SensorConfig::default(),
    );
    ControlLoop::new(
        sensor,
        SimPot { raw: pot_raw },
        SimRelay::default(),
        SimButton { pressed },
        VirtualTime::starting_at(now_ms),
        ControlTiming::default(),
    )
}

fn parse_number<T: std::str::FromStr>(value: &str, command: &str) -> Result<T, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::Syntax(format!("{command}: `{value}` is not a number")))
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    match topic {
        None => {
            let mut lines = vec![format!("topics: {}", help_topic_list())];
            lines.extend(HELP_TOPICS.iter().map(|(_, usage)| (*usage).to_string()));
            lines
        }
        Some(topic) => match HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        {
            Some((_, usage)) => vec![(*usage).to_string()],
            None => vec![format!(
                "ERR unknown help topic `{topic}` (topics: {})",
                help_topic_list()
            )],
        },
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_record(record: &TelemetryRecord<SimInstant>) -> String {
    match record.details {
        TelemetryPayload::None => format!("#{:<3} {} {}", record.id, record.timestamp, record.event),
        TelemetryPayload::Reading(reading) => format!(
            "#{:<3} {} {} {} < {}",
            record.id, record.timestamp, record.event, reading.distance, reading.threshold
        ),
    }
}

struct TranscriptLogger {
    writer: Box<dyn Write>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: Box::new(BufWriter::new(file)),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    #[cfg(test)]
    fn discard() -> Self {
        Self {
            writer: Box::new(io::sink()),
        }
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: SimInstant,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
