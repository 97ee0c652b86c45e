//! Top-level control loop for the tracker.
//!
//! The orchestrator runs one non-blocking iteration per scheduler pass and is
//! the sole arbiter of the modem: it owns the power state machine, decides
//! which collaborator may touch the modem channel this tick, and asks the
//! sleep scheduler whether the device may suspend. Collaborators are reached
//! through the trait seams below so firmware, the emulator, and tests can
//! supply their own implementations.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::clock::{Clock, seconds_elapsed_and_update};
use crate::io::IdleService;
use crate::log::{DebugLog, LogLine, LogSink, RecordOptions};
use crate::sleep::{SleepConfig, SleepScheduler};

/// Modem power lifecycle.
///
/// `Starting` and `Stopping` mark a transition in progress and are mutually
/// exclusive by construction; `Powered` is reachable only through a
/// successful `Starting` edge, and `Off` is reachable from every state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    Off,
    Starting,
    Powered,
    Stopping,
}

impl PowerState {
    /// Returns `true` while a power transition is in flight.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, PowerState::Starting | PowerState::Stopping)
    }

    /// Returns `true` when `next` is a legal edge from this state.
    #[must_use]
    pub const fn allows(self, next: PowerState) -> bool {
        matches!(
            (self, next),
            (PowerState::Off, PowerState::Starting)
                | (PowerState::Starting, PowerState::Powered)
                | (PowerState::Starting, PowerState::Off)
                | (PowerState::Powered, PowerState::Stopping)
                | (PowerState::Stopping, PowerState::Off)
        )
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Off => f.write_str("off"),
            PowerState::Starting => f.write_str("starting"),
            PowerState::Powered => f.write_str("powered"),
            PowerState::Stopping => f.write_str("stopping"),
        }
    }
}

/// Failure reported when attempting an invalid power-state edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransitionError {
    pub from: PowerState,
    pub to: PowerState,
}

impl TransitionError {
    #[must_use]
    pub const fn new(from: PowerState, to: PowerState) -> Self {
        Self { from, to }
    }
}

/// Modem power rail control. Both operations are idempotent.
pub trait ModemPower {
    fn on(&mut self);
    fn off(&mut self);
}

/// Logical conversation with the cellular/GPS module, independent of the
/// power rail.
pub trait ModemSession {
    /// Non-blocking best-effort session start.
    fn begin(&mut self) -> bool;
    fn stop(&mut self);
    /// Advances session state one step.
    fn handle_client(&mut self);
    /// Forwards one raw command line to the module (AT pass-through).
    fn send_command(&mut self, command: &str);
    fn waiting_for_gps(&self) -> bool;
    fn is_active(&self) -> bool;
}

/// MQTT collaborator. Must not be serviced while a GPS fix is pending.
pub trait MqttChannel {
    fn handle_client(&mut self);
    fn waiting_for_mqtt(&self) -> bool;
}

/// SMS command collaborator. Must not be serviced while a GPS fix is pending.
pub trait SmsChannel {
    fn handle_client(&mut self);
}

/// Non-blocking environmental/battery samplers updating the shared store.
pub trait Sensors {
    /// Latest battery reading in millivolts; zero when no sample exists yet.
    fn read_voltage(&mut self) -> u16;
    fn read_values(&mut self);
}

/// Local wireless networking control, used only on the way into deep sleep.
pub trait Wireless {
    fn disable(&mut self);
}

/// Low-power suspend. Execution restarts at top-level setup on wake.
pub trait Suspend {
    fn deep_sleep(&mut self, secs: u64);
}

/// Maximum bytes for a queued text command.
pub const MAX_COMMAND_TEXT: usize = 96;

/// One queued text command.
pub type CommandText = String<MAX_COMMAND_TEXT>;

/// FIFO of pending text commands; the orchestrator drains one per tick.
pub trait CommandQueue {
    fn is_empty(&self) -> bool;
    fn remove_head(&mut self) -> Option<CommandText>;
}

/// Read-only configuration snapshot consulted every tick.
#[derive(Copy, Clone, Debug, Default)]
pub struct TrackerConfig {
    /// Desired modem power, compared against the actual [`PowerState`].
    pub gsm_power: bool,
    pub sms_enabled: bool,
    pub mqtt_enabled: bool,
    pub sleep: SleepConfig,
}

/// Explicit context object bundling configuration and every collaborator.
/// Constructed once at startup and passed by reference into each tick,
/// replacing the implicit global singletons of older firmware generations.
pub struct TrackerContext<M, S, Q, T, V, D, W, Z> {
    pub config: TrackerConfig,
    pub modem_power: M,
    pub session: S,
    pub mqtt: Q,
    pub sms: T,
    pub sensors: V,
    pub commands: D,
    pub wireless: W,
    pub suspend: Z,
}

/// Shared modem shutdown helper: both the demand-driven power-off edge and
/// the deep-sleep path go through here, so the rail is never cut while the
/// session object still considers itself active.
pub fn shutdown_modem(session: &mut impl ModemSession, power: &mut impl ModemPower) {
    if session.is_active() {
        session.stop();
    }
    power.off();
}

/// Seconds between debounced battery voltage reads.
const VOLTAGE_POLL_SECS: u64 = 10;

/// The control loop state machine. One [`tick`](Self::tick) per scheduler
/// pass; every mutation of [`PowerState`] happens inside a tick.
pub struct PowerOrchestrator {
    state: PowerState,
    voltage_check_sec: u64,
    battery_millivolts: u16,
}

impl PowerOrchestrator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: PowerState::Off,
            voltage_check_sec: 0,
            battery_millivolts: 0,
        }
    }

    /// Current actual power state.
    #[must_use]
    pub const fn state(&self) -> PowerState {
        self.state
    }

    /// Latest debounced battery reading in millivolts.
    #[must_use]
    pub const fn battery_millivolts(&self) -> u16 {
        self.battery_millivolts
    }

    /// Runs one cooperative iteration in the fixed order: sensor sampling,
    /// command drain, responder service, power evaluation, collaborator
    /// dispatch, sleep evaluation. The sleep decision therefore always sees
    /// the pending-GPS/pending-MQTT flags of the same tick.
    pub fn tick<M, S, Q, T, V, D, W, Z, K>(
        &mut self,
        ctx: &mut TrackerContext<M, S, Q, T, V, D, W, Z>,
        clock: &impl Clock,
        services: &mut impl IdleService,
        log: &mut DebugLog<K>,
    ) where
        M: ModemPower,
        S: ModemSession,
        Q: MqttChannel,
        T: SmsChannel,
        V: Sensors,
        D: CommandQueue,
        W: Wireless,
        Z: Suspend,
        K: LogSink,
    {
        ctx.sensors.read_values();
        if seconds_elapsed_and_update(clock, &mut self.voltage_check_sec, VOLTAGE_POLL_SECS) {
            self.battery_millivolts = ctx.sensors.read_voltage();
        }

        let pending = if ctx.commands.is_empty() {
            None
        } else {
            ctx.commands.remove_head()
        };

        services.service_once();

        self.evaluate_power(ctx, clock, services, log);
        self.dispatch(ctx, pending.as_deref(), clock, services, log);
        self.evaluate_sleep(ctx, clock, services, log);
    }

    /// Attempts a state edge, rejecting invalid combinations.
    fn transition(&mut self, next: PowerState) -> Result<(), TransitionError> {
        if self.state.allows(next) {
            self.state = next;
            Ok(())
        } else {
            Err(TransitionError::new(self.state, next))
        }
    }

    fn evaluate_power<M, S, Q, T, V, D, W, Z, K>(
        &mut self,
        ctx: &mut TrackerContext<M, S, Q, T, V, D, W, Z>,
        clock: &impl Clock,
        services: &mut impl IdleService,
        log: &mut DebugLog<K>,
    ) where
        M: ModemPower,
        S: ModemSession,
        K: LogSink,
    {
        // A transition already in flight is never interrupted; the attempt
        // is skipped and retried next tick.
        if self.state.is_transitioning() {
            return;
        }

        match (self.state, ctx.config.gsm_power) {
            (PowerState::Off, true) => {
                let _ = self.transition(PowerState::Starting);
                ctx.modem_power.on();
                if ctx.session.begin() {
                    let _ = self.transition(PowerState::Powered);
                    log.record(clock, services, "modem session up", RecordOptions::line());
                } else {
                    // Transient failure: tear down synchronously and let the
                    // next tick retry the same edge.
                    ctx.session.stop();
                    ctx.modem_power.off();
                    let _ = self.transition(PowerState::Off);
                    log.record(
                        clock,
                        services,
                        "modem session begin failed, retrying",
                        RecordOptions::line(),
                    );
                }
            }
            (PowerState::Powered, false) => {
                let _ = self.transition(PowerState::Stopping);
                shutdown_modem(&mut ctx.session, &mut ctx.modem_power);
                let _ = self.transition(PowerState::Off);
                log.record(clock, services, "modem powered down", RecordOptions::line());
            }
            _ => {}
        }
    }

    fn dispatch<M, S, Q, T, V, D, W, Z, K>(
        &mut self,
        ctx: &mut TrackerContext<M, S, Q, T, V, D, W, Z>,
        pending_command: Option<&str>,
        clock: &impl Clock,
        services: &mut impl IdleService,
        log: &mut DebugLog<K>,
    ) where
        S: ModemSession,
        Q: MqttChannel,
        T: SmsChannel,
        K: LogSink,
    {
        if self.state != PowerState::Powered {
            if let Some(command) = pending_command {
                let mut line = LogLine::new();
                let _ = write!(line, "dropping command while modem down: {command}");
                log.record(clock, services, line.as_str(), RecordOptions::line());
            }
            return;
        }

        // At most one producer touches the modem channel per tick: a drained
        // command replaces the plain session service for that tick.
        match pending_command {
            Some(command) => {
                let mut line = LogLine::new();
                let _ = write!(line, "pass-through: {command}");
                log.record(clock, services, line.as_str(), RecordOptions::line());
                ctx.session.send_command(command);
            }
            None => ctx.session.handle_client(),
        }

        // SMS and MQTT are withheld until the fix resolves so neither can
        // publish or act on stale position data.
        if ctx.session.waiting_for_gps() {
            return;
        }
        if ctx.config.sms_enabled {
            ctx.sms.handle_client();
        }
        if ctx.config.mqtt_enabled {
            ctx.mqtt.handle_client();
        }
    }

    fn evaluate_sleep<M, S, Q, T, V, D, W, Z, K>(
        &mut self,
        ctx: &mut TrackerContext<M, S, Q, T, V, D, W, Z>,
        clock: &impl Clock,
        services: &mut impl IdleService,
        log: &mut DebugLog<K>,
    ) where
        M: ModemPower,
        S: ModemSession,
        Q: MqttChannel,
        W: Wireless,
        Z: Suspend,
        K: LogSink,
    {
        let scheduler = SleepScheduler::new(ctx.config.sleep);
        if !scheduler.is_eligible(clock, self.battery_millivolts, &ctx.session, &ctx.mqtt) {
            return;
        }

        log.record(clock, services, "entering deep sleep", RecordOptions::line());
        scheduler.enter_sleep(
            &mut ctx.session,
            &mut ctx.modem_power,
            &mut ctx.wireless,
            services,
            &mut ctx.suspend,
        );

        // Bookkeeping for hosts that keep running after a simulated suspend;
        // real hardware restarts at setup instead.
        if self.state == PowerState::Powered {
            let _ = self.transition(PowerState::Stopping);
            let _ = self.transition(PowerState::Off);
        }
    }
}

impl Default for PowerOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
