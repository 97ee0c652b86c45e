use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use tracker_core::checksum;
use tracker_core::clock::Clock;
use tracker_core::interval;
use tracker_core::io::IdleService;
use tracker_core::log::{DebugLog, LogSink};
use tracker_core::orchestrator::{
    CommandQueue, CommandText, ModemPower, ModemSession, MqttChannel, PowerOrchestrator,
    Sensors, SmsChannel, Suspend, TrackerConfig, TrackerContext, Wireless,
};
use tracker_core::sleep::SleepConfig;

/// Service passes a simulated modem needs after `begin` before it reports a
/// GPS fix under the `normal` profile.
const NORMAL_FIX_PASSES: u32 = 5;

/// Consecutive `begin` attempts that fail under the `flaky-modem` profile.
const FLAKY_BEGIN_FAILURES: u32 = 3;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("tick", "tick [n]                 - run n orchestrator passes (default 1)"),
    ("status", "status                   - power state, battery, channel counters"),
    ("log", "log [clear]              - dump or clear the debug log store"),
    ("gsm", "gsm on|off               - set desired modem power"),
    ("sms", "sms on|off               - enable or disable the SMS channel"),
    ("mqtt", "mqtt on|off              - enable or disable the MQTT channel"),
    ("send", "send <command>           - queue a raw module command (AT pass-through)"),
    ("gps", "gps fix|pending          - force or re-arm the simulated GPS fix"),
    ("battery", "battery <millivolts>     - set the simulated battery reading"),
    ("sleep", "sleep active|duration <[D ]HH:MM:SS> | sleep battery <mv>"),
    ("crc", "crc <text>               - CRC-32 of the argument, as firmware settings use"),
    ("help", "help [topic]             - show help for a command"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimProfile {
    Normal,
    FlakyModem,
    LowBattery,
}

impl SimProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            SimProfile::Normal => "logs/emulator-normal.log",
            SimProfile::FlakyModem => "logs/emulator-flaky-modem.log",
            SimProfile::LowBattery => "logs/emulator-low-battery.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            SimProfile::Normal => "Tracker emulator transcript (normal profile)",
            SimProfile::FlakyModem => "Tracker emulator transcript (flaky-modem profile)",
            SimProfile::LowBattery => "Tracker emulator transcript (low-battery profile)",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SimProfile::Normal => "normal",
            SimProfile::FlakyModem => "flaky-modem",
            SimProfile::LowBattery => "low-battery",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("normal") {
            Ok(Self::Normal)
        } else if tag.eq_ignore_ascii_case("flaky-modem") {
            Ok(Self::FlakyModem)
        } else if tag.eq_ignore_ascii_case("low-battery") {
            Ok(Self::LowBattery)
        } else {
            Err(format!("Unknown profile `{tag}`"))
        }
    }

    /// Resolves the profile from command-line arguments. Accepts
    /// `--profile <tag>`, `--profile=<tag>`, or a bare tag; no
    /// arguments selects the normal profile.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let Some(first) = args.next() else {
            return Ok(Self::Normal);
        };

        let profile = if let Some(value) = first.strip_prefix("--profile=") {
            Self::from_tag(value)?
        } else if first == "--profile" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --profile".to_string())?;
            Self::from_tag(&value)?
        } else {
            Self::from_tag(&first)?
        };

        if let Some(extra) = args.next() {
            return Err(format!("Unexpected argument `{extra}`"));
        }

        Ok(profile)
    }
}

/// Deterministic clock advanced one second per orchestrator pass.
struct SimClock {
    seconds: Cell<u64>,
}

impl SimClock {
    const fn new() -> Self {
        Self {
            seconds: Cell::new(1),
        }
    }

    fn advance(&self) {
        self.seconds.set(self.seconds.get() + 1);
    }
}

impl Clock for SimClock {
    fn seconds_since_power_on(&self) -> u64 {
        self.seconds.get()
    }

    fn now_millis(&self) -> u64 {
        self.seconds.get() * 1_000
    }
}

/// Host-side service pump; nothing to service, nothing to wait on.
#[derive(Default)]
struct SimServices {
    passes: u32,
}

impl IdleService for SimServices {
    fn service_once(&mut self) {
        self.passes += 1;
    }

    fn yield_once(&mut self) {}

    fn wait_ms(&mut self, _: u64) {}
}

/// Mirror sink collecting raw log text for the current command's response.
struct MirrorSink(Rc<RefCell<Vec<String>>>);

impl LogSink for MirrorSink {
    fn write(&mut self, text: &str) {
        self.0.borrow_mut().push(text.to_string());
    }
}

struct SimPower {
    rail_on: bool,
}

impl ModemPower for SimPower {
    fn on(&mut self) {
        self.rail_on = true;
    }

    fn off(&mut self) {
        self.rail_on = false;
    }
}

/// Scripted cellular/GPS module: `begin` fails a configurable number of
/// times, and the GPS fix arrives after a fixed number of service passes.
struct SimModem {
    active: bool,
    begin_failures_left: u32,
    fix_passes: u32,
    fix_countdown: Option<u32>,
    last_command: Option<String>,
    service_passes: u32,
}

impl SimModem {
    fn new(profile: SimProfile) -> Self {
        let begin_failures_left = match profile {
            SimProfile::FlakyModem => FLAKY_BEGIN_FAILURES,
            SimProfile::Normal | SimProfile::LowBattery => 0,
        };
        Self {
            active: false,
            begin_failures_left,
            fix_passes: NORMAL_FIX_PASSES,
            fix_countdown: None,
            last_command: None,
            service_passes: 0,
        }
    }
}

impl ModemSession for SimModem {
    fn begin(&mut self) -> bool {
        if self.begin_failures_left > 0 {
            self.begin_failures_left -= 1;
            return false;
        }
        self.active = true;
        self.fix_countdown = Some(self.fix_passes);
        true
    }

    fn stop(&mut self) {
        self.active = false;
        self.fix_countdown = None;
    }

    fn handle_client(&mut self) {
        self.service_passes += 1;
        if let Some(remaining) = self.fix_countdown {
            self.fix_countdown = remaining.checked_sub(1);
        }
    }

    fn send_command(&mut self, command: &str) {
        self.last_command = Some(command.to_string());
    }

    fn waiting_for_gps(&self) -> bool {
        self.fix_countdown.is_some()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Default)]
struct SimMqtt {
    publishes: u32,
}

impl MqttChannel for SimMqtt {
    fn handle_client(&mut self) {
        self.publishes += 1;
    }

    fn waiting_for_mqtt(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct SimSms {
    polls: u32,
}

impl SmsChannel for SimSms {
    fn handle_client(&mut self) {
        self.polls += 1;
    }
}

struct SimSensors {
    millivolts: u16,
    reads: u32,
}

impl Sensors for SimSensors {
    fn read_voltage(&mut self) -> u16 {
        self.millivolts
    }

    fn read_values(&mut self) {
        self.reads += 1;
    }
}

#[derive(Default)]
struct HostQueue {
    commands: VecDeque<CommandText>,
}

impl CommandQueue for HostQueue {
    fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn remove_head(&mut self) -> Option<CommandText> {
        self.commands.pop_front()
    }
}

#[derive(Default)]
struct SimWireless {
    disabled: bool,
}

impl Wireless for SimWireless {
    fn disable(&mut self) {
        self.disabled = true;
    }
}

/// Deep sleep cannot actually suspend the host; the request is captured and
/// narrated instead.
#[derive(Default)]
struct SimSuspend {
    requested: Cell<Option<u64>>,
}

impl Suspend for SimSuspend {
    fn deep_sleep(&mut self, secs: u64) {
        self.requested.set(Some(secs));
    }
}

type SimContext =
    TrackerContext<SimPower, SimModem, SimMqtt, SimSms, SimSensors, HostQueue, SimWireless, SimSuspend>;

pub struct Session {
    ctx: SimContext,
    orchestrator: PowerOrchestrator,
    clock: SimClock,
    services: SimServices,
    log: DebugLog<MirrorSink>,
    mirror: Rc<RefCell<Vec<String>>>,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(profile: SimProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let mirror = Rc::new(RefCell::new(Vec::new()));

        let mut config = TrackerConfig {
            gsm_power: true,
            sms_enabled: true,
            mqtt_enabled: true,
            sleep: SleepConfig::default(),
        };
        let millivolts = match profile {
            SimProfile::LowBattery => {
                config.sleep.low_battery_millivolts = 3_500;
                3_300
            }
            SimProfile::Normal | SimProfile::FlakyModem => 4_100,
        };

        let ctx = TrackerContext {
            config,
            modem_power: SimPower { rail_on: false },
            session: SimModem::new(profile),
            mqtt: SimMqtt::default(),
            sms: SimSms::default(),
            sensors: SimSensors {
                millivolts,
                reads: 0,
            },
            commands: HostQueue::default(),
            wireless: SimWireless::default(),
            suspend: SimSuspend::default(),
        };

        Ok(Self {
            ctx,
            orchestrator: PowerOrchestrator::new(),
            clock: SimClock::new(),
            services: SimServices::default(),
            log: DebugLog::new(MirrorSink(Rc::clone(&mirror))),
            mirror,
            transcript,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let at_sec = self.clock.seconds_since_power_on();
        self.transcript
            .append_line(at_sec, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let rest = trimmed[verb.len()..].trim_start();

        let lines = match verb.to_ascii_lowercase().as_str() {
            "tick" => self.handle_tick(rest),
            "status" => self.handle_status(),
            "log" => self.handle_log(rest),
            "gsm" => self.handle_toggle(rest, Toggle::Gsm),
            "sms" => self.handle_toggle(rest, Toggle::Sms),
            "mqtt" => self.handle_toggle(rest, Toggle::Mqtt),
            "send" => self.handle_send(rest),
            "gps" => self.handle_gps(rest),
            "battery" => self.handle_battery(rest),
            "sleep" => self.handle_sleep(rest),
            "crc" => Self::handle_crc(rest),
            "help" => Self::handle_help(rest),
            other => vec![format!(
                "ERR unknown command `{other}`; type `help` for a list"
            )],
        };

        let at_sec = self.clock.seconds_since_power_on();
        for output in &lines {
            self.transcript
                .append_line(at_sec, TranscriptRole::Emulator, output)?;
        }
        Ok(lines)
    }

    fn handle_tick(&mut self, rest: &str) -> Vec<String> {
        let count: u64 = if rest.is_empty() {
            1
        } else {
            match rest.parse() {
                Ok(value) => value,
                Err(_) => return vec![format!("ERR tick count `{rest}` is not a number")],
            }
        };

        let mut lines = Vec::new();
        for _ in 0..count {
            self.orchestrator.tick(
                &mut self.ctx,
                &self.clock,
                &mut self.services,
                &mut self.log,
            );
            for text in self.mirror.borrow_mut().drain(..) {
                lines.push(format!("dbg> {text}"));
            }
            if let Some(secs) = self.ctx.suspend.requested.take() {
                lines.push(format!(
                    "deep sleep requested for {}; emulator keeps running",
                    interval::format(secs)
                ));
            }
            self.clock.advance();
        }
        lines.push(format!(
            "ran {count} pass(es); state={} uptime={}s",
            self.orchestrator.state(),
            self.clock.seconds_since_power_on()
        ));
        lines
    }

    fn handle_status(&mut self) -> Vec<String> {
        vec![
            format!(
                "power: state={} desired={} rail={}",
                self.orchestrator.state(),
                on_off(self.ctx.config.gsm_power),
                on_off(self.ctx.modem_power.rail_on),
            ),
            format!(
                "modem: active={} gps-pending={} service-passes={} last-command={}",
                on_off(self.ctx.session.is_active()),
                on_off(self.ctx.session.waiting_for_gps()),
                self.ctx.session.service_passes,
                self.ctx.session.last_command.as_deref().unwrap_or("-"),
            ),
            format!(
                "battery: {}mv (debounced {}mv, {} sensor pass(es))",
                self.ctx.sensors.millivolts,
                self.orchestrator.battery_millivolts(),
                self.ctx.sensors.reads,
            ),
            format!(
                "channels: sms={} ({} polls), mqtt={} ({} publishes)",
                on_off(self.ctx.config.sms_enabled),
                self.ctx.sms.polls,
                on_off(self.ctx.config.mqtt_enabled),
                self.ctx.mqtt.publishes,
            ),
            format!(
                "sleep: active={} low-battery={}mv duration={}",
                interval::format(self.ctx.config.sleep.active_secs),
                self.ctx.config.sleep.low_battery_millivolts,
                interval::format(self.ctx.config.sleep.sleep_secs),
            ),
            format!(
                "idle: {} responder pass(es), wireless={}",
                self.services.passes,
                if self.ctx.wireless.disabled {
                    "disabled"
                } else {
                    "enabled"
                },
            ),
            format!(
                "log: {} line(s), {} evicted",
                self.log.store().len(),
                self.log.store().overflow_count(),
            ),
        ]
    }

    fn handle_log(&mut self, rest: &str) -> Vec<String> {
        if rest.eq_ignore_ascii_case("clear") {
            let mut removed = 0_usize;
            while self.log.remove_head().is_some() {
                removed += 1;
            }
            return vec![format!("cleared {removed} line(s)")];
        }
        if !rest.is_empty() {
            return vec![format!("ERR log takes `clear` or nothing, got `{rest}`")];
        }

        if self.log.store().is_empty() {
            return vec!["log store is empty".to_string()];
        }
        let mut lines = Vec::with_capacity(self.log.store().len() + 1);
        if self.log.store().overflow_count() > 0 {
            lines.push(format!(
                "({} older line(s) evicted)",
                self.log.store().overflow_count()
            ));
        }
        for entry in self.log.store().iter() {
            lines.push(entry.as_str().to_string());
        }
        lines
    }

    fn handle_toggle(&mut self, rest: &str, which: Toggle) -> Vec<String> {
        let value = match parse_on_off(rest) {
            Some(value) => value,
            None => return vec![format!("ERR expected `on` or `off`, got `{rest}`")],
        };
        let label = match which {
            Toggle::Gsm => {
                self.ctx.config.gsm_power = value;
                "desired modem power"
            }
            Toggle::Sms => {
                self.ctx.config.sms_enabled = value;
                "SMS channel"
            }
            Toggle::Mqtt => {
                self.ctx.config.mqtt_enabled = value;
                "MQTT channel"
            }
        };
        vec![format!("{label} set to {}", on_off(value))]
    }

    fn handle_send(&mut self, rest: &str) -> Vec<String> {
        if rest.is_empty() {
            return vec!["ERR send needs a command line".to_string()];
        }
        let mut text = CommandText::new();
        if text.push_str(rest).is_err() {
            return vec![format!(
                "ERR command longer than {} bytes",
                tracker_core::orchestrator::MAX_COMMAND_TEXT
            )];
        }
        self.ctx.commands.commands.push_back(text);
        vec![format!(
            "queued; {} command(s) pending, drained one per pass",
            self.ctx.commands.commands.len()
        )]
    }

    fn handle_gps(&mut self, rest: &str) -> Vec<String> {
        if rest.eq_ignore_ascii_case("fix") {
            self.ctx.session.fix_countdown = None;
            vec!["GPS fix forced".to_string()]
        } else if rest.eq_ignore_ascii_case("pending") {
            self.ctx.session.fix_countdown = Some(self.ctx.session.fix_passes);
            vec![format!(
                "GPS fix re-armed, resolves after {} service pass(es)",
                self.ctx.session.fix_passes
            )]
        } else {
            vec![format!("ERR expected `fix` or `pending`, got `{rest}`")]
        }
    }

    fn handle_battery(&mut self, rest: &str) -> Vec<String> {
        match rest.parse::<u16>() {
            Ok(millivolts) => {
                self.ctx.sensors.millivolts = millivolts;
                vec![format!("battery reading set to {millivolts}mv")]
            }
            Err(_) => vec![format!("ERR `{rest}` is not a millivolt value")],
        }
    }

    fn handle_sleep(&mut self, rest: &str) -> Vec<String> {
        let (field, value) = match rest.split_once(' ') {
            Some(pair) => pair,
            None => {
                return vec![
                    "ERR usage: sleep active|duration <[D ]HH:MM:SS> | sleep battery <mv>"
                        .to_string(),
                ];
            }
        };
        let value = value.trim();

        match field.to_ascii_lowercase().as_str() {
            "battery" => match value.parse::<u16>() {
                Ok(millivolts) => {
                    self.ctx.config.sleep.low_battery_millivolts = millivolts;
                    vec![format!("low-battery threshold set to {millivolts}mv")]
                }
                Err(_) => vec![format!("ERR `{value}` is not a millivolt value")],
            },
            "active" => match interval::parse(value) {
                Ok(secs) => {
                    self.ctx.config.sleep.active_secs = secs;
                    vec![format!("active window set to {}", interval::format(secs))]
                }
                Err(err) => vec![format!("ERR `{value}`: {err}")],
            },
            "duration" => match interval::parse(value) {
                Ok(secs) => {
                    self.ctx.config.sleep.sleep_secs = secs;
                    vec![format!("sleep duration set to {}", interval::format(secs))]
                }
                Err(err) => vec![format!("ERR `{value}`: {err}")],
            },
            other => vec![format!("ERR unknown sleep field `{other}`")],
        }
    }

    fn handle_crc(rest: &str) -> Vec<String> {
        if rest.is_empty() {
            return vec!["ERR crc needs an argument".to_string()];
        }
        let crc = checksum::update(0, rest.as_bytes());
        vec![format!("crc32({rest:?}) = {crc:#010x}")]
    }

    fn handle_help(rest: &str) -> Vec<String> {
        let topic = rest.trim();
        if !topic.is_empty() {
            return match HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(topic))
            {
                Some((_, detail)) => vec![(*detail).to_string()],
                None => vec![
                    format!("No help available for `{topic}`."),
                    format!("Available topics: {}", help_topic_list()),
                ],
            };
        }

        let mut lines = Vec::with_capacity(HELP_TOPICS.len() + 2);
        lines.push("Available commands:".to_string());
        for (_, detail) in HELP_TOPICS {
            lines.push(format!("  {detail}"));
        }
        lines.push("Type `help <topic>` for a specific command.".to_string());
        lines
    }
}

#[derive(Copy, Clone)]
enum Toggle {
    Gsm,
    Sms,
    Mqtt,
}

fn parse_on_off(word: &str) -> Option<bool> {
    if word.eq_ignore_ascii_case("on") {
        Some(true)
    } else if word.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn help_topic_list() -> String {
    let mut buffer = String::new();
    for (index, (name, _)) in HELP_TOPICS.iter().enumerate() {
        if index > 0 {
            buffer.push_str(", ");
        }
        buffer.push_str(name);
    }
    buffer
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: SimProfile) -> io::Result<Self> {
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
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: SimProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated seconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, at_sec: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{at_sec:>5}s] {} {line}", role.prefix())?;
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

#[cfg(test)]
mod tests {
    use super::SimProfile;

    fn args(parts: &[&str]) -> impl Iterator<Item = String> {
        parts
            .iter()
            .map(|part| (*part).to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn no_arguments_selects_the_normal_profile() {
        assert_eq!(SimProfile::from_args(args(&[])), Ok(SimProfile::Normal));
    }

    #[test]
    fn profile_flag_forms_and_bare_tags_resolve() {
        assert_eq!(
            SimProfile::from_args(args(&["--profile", "flaky-modem"])),
            Ok(SimProfile::FlakyModem)
        );
        assert_eq!(
            SimProfile::from_args(args(&["--profile=low-battery"])),
            Ok(SimProfile::LowBattery)
        );
        assert_eq!(
            SimProfile::from_args(args(&["Normal"])),
            Ok(SimProfile::Normal)
        );
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(SimProfile::from_args(args(&["--profile"])).is_err());
        assert!(SimProfile::from_args(args(&["satellite"])).is_err());
        assert!(SimProfile::from_args(args(&["normal", "extra"])).is_err());
    }
}
