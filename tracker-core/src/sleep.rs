//! Deep-sleep eligibility and shutdown sequencing.
//!
//! The scheduler answers one question per tick: is it safe to power the
//! device down right now? Safe means the configured condition (active-time
//! threshold or low battery) holds AND nothing is in flight: no pending GPS
//! fix, no pending MQTT send. Both pending flags are read from the live
//! collaborators at the moment of the decision, never cached.

use crate::clock::Clock;
use crate::io::IdleService;
use crate::orchestrator::{ModemPower, ModemSession, MqttChannel, Suspend, Wireless, shutdown_modem};

/// Sleep-related configuration, durations persisted in `[D ]HH:MM:SS` form.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepConfig {
    /// Stay awake this many seconds after power-on before sleep is
    /// considered. Zero disables the time condition.
    pub active_secs: u64,
    /// Battery level at or below which the device sleeps to protect the
    /// cell. Zero disables the battery condition.
    pub low_battery_millivolts: u16,
    /// Requested deep-sleep duration.
    pub sleep_secs: u64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            active_secs: 0,
            low_battery_millivolts: 0,
            sleep_secs: 3_600,
        }
    }
}

/// Decides when the device may suspend and runs the ordered shutdown.
pub struct SleepScheduler {
    config: SleepConfig,
}

impl SleepScheduler {
    #[must_use]
    pub const fn new(config: SleepConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SleepConfig {
        &self.config
    }

    /// Returns `true` only when a configured condition is met and neither a
    /// GPS fix nor an MQTT send is pending.
    #[must_use]
    pub fn is_eligible(
        &self,
        clock: &impl Clock,
        battery_millivolts: u16,
        session: &impl ModemSession,
        mqtt: &impl MqttChannel,
    ) -> bool {
        if session.waiting_for_gps() || mqtt.waiting_for_mqtt() {
            return false;
        }

        let active_expired = self.config.active_secs > 0
            && clock.seconds_since_power_on() > self.config.active_secs;
        let battery_low = self.config.low_battery_millivolts > 0
            && battery_millivolts > 0
            && battery_millivolts <= self.config.low_battery_millivolts;

        active_expired || battery_low
    }

    /// Powers the device down in strict order: stop the modem session if it
    /// is active, cut modem power, disable local wireless, yield once, then
    /// suspend. Execution resumes at top-level setup on wake.
    ///
    /// The first two steps are the same shutdown helper the demand-driven
    /// power-off path uses, so the modem rail is never cut under a session
    /// that still considers itself active.
    pub fn enter_sleep(
        &self,
        session: &mut impl ModemSession,
        power: &mut impl ModemPower,
        wireless: &mut impl Wireless,
        services: &mut impl IdleService,
        suspend: &mut impl Suspend,
    ) {
        shutdown_modem(session, power);
        wireless.disable();
        services.yield_once();
        suspend.deep_sleep(self.config.sleep_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::{SleepConfig, SleepScheduler};
    use crate::clock::Clock;
    use crate::io::IdleService;
    use crate::orchestrator::{ModemPower, ModemSession, MqttChannel, Suspend, Wireless};
    use core::cell::RefCell;
    use heapless::Vec;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn seconds_since_power_on(&self) -> u64 {
            self.0
        }

        fn now_millis(&self) -> u64 {
            self.0 * 1_000
        }
    }

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Step {
        SessionStop,
        PowerOff,
        WirelessOff,
        Yield,
        DeepSleep(u64),
    }

    #[derive(Default)]
    struct Trace(RefCell<Vec<Step, 8>>);

    impl Trace {
        fn push(&self, step: Step) {
            self.0.borrow_mut().push(step).expect("trace overflow");
        }
    }

    struct TraceSession<'a> {
        trace: &'a Trace,
        active: bool,
        waiting_gps: bool,
    }

    impl ModemSession for TraceSession<'_> {
        fn begin(&mut self) -> bool {
            true
        }

        fn stop(&mut self) {
            self.active = false;
            self.trace.push(Step::SessionStop);
        }

        fn handle_client(&mut self) {}

        fn send_command(&mut self, _: &str) {}

        fn waiting_for_gps(&self) -> bool {
            self.waiting_gps
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    struct TracePower<'a>(&'a Trace);

    impl ModemPower for TracePower<'_> {
        fn on(&mut self) {}

        fn off(&mut self) {
            self.0.push(Step::PowerOff);
        }
    }

    struct TraceWireless<'a>(&'a Trace);

    impl Wireless for TraceWireless<'_> {
        fn disable(&mut self) {
            self.0.push(Step::WirelessOff);
        }
    }

    struct TraceSuspend<'a>(&'a Trace);

    impl Suspend for TraceSuspend<'_> {
        fn deep_sleep(&mut self, secs: u64) {
            self.0.push(Step::DeepSleep(secs));
        }
    }

    struct TraceServices<'a>(&'a Trace);

    impl IdleService for TraceServices<'_> {
        fn service_once(&mut self) {}

        fn yield_once(&mut self) {
            self.0.push(Step::Yield);
        }

        fn wait_ms(&mut self, _: u64) {}
    }

    struct IdleMqtt {
        waiting: bool,
    }

    impl MqttChannel for IdleMqtt {
        fn handle_client(&mut self) {}

        fn waiting_for_mqtt(&self) -> bool {
            self.waiting
        }
    }

    fn scheduler(active_secs: u64, low_mv: u16) -> SleepScheduler {
        SleepScheduler::new(SleepConfig {
            active_secs,
            low_battery_millivolts: low_mv,
            sleep_secs: 600,
        })
    }

    #[test]
    fn not_eligible_before_active_time_expires() {
        let trace = Trace::default();
        let session = TraceSession {
            trace: &trace,
            active: true,
            waiting_gps: false,
        };
        let mqtt = IdleMqtt { waiting: false };

        let sched = scheduler(300, 0);
        assert!(!sched.is_eligible(&FixedClock(300), 4_000, &session, &mqtt));
        assert!(sched.is_eligible(&FixedClock(301), 4_000, &session, &mqtt));
    }

    #[test]
    fn low_battery_triggers_regardless_of_uptime() {
        let trace = Trace::default();
        let session = TraceSession {
            trace: &trace,
            active: true,
            waiting_gps: false,
        };
        let mqtt = IdleMqtt { waiting: false };

        let sched = scheduler(0, 3_500);
        assert!(sched.is_eligible(&FixedClock(1), 3_500, &session, &mqtt));
        assert!(!sched.is_eligible(&FixedClock(1), 3_501, &session, &mqtt));
        // A zero reading means "no sample yet", never "empty battery".
        assert!(!sched.is_eligible(&FixedClock(1), 0, &session, &mqtt));
    }

    #[test]
    fn pending_gps_or_mqtt_vetoes_eligibility() {
        let trace = Trace::default();
        let gps_pending = TraceSession {
            trace: &trace,
            active: true,
            waiting_gps: true,
        };
        let idle_session = TraceSession {
            trace: &trace,
            active: true,
            waiting_gps: false,
        };

        let sched = scheduler(10, 0);
        let clock = FixedClock(1_000);

        assert!(!sched.is_eligible(&clock, 4_000, &gps_pending, &IdleMqtt { waiting: false }));
        assert!(!sched.is_eligible(&clock, 4_000, &idle_session, &IdleMqtt { waiting: true }));
        assert!(sched.is_eligible(&clock, 4_000, &idle_session, &IdleMqtt { waiting: false }));
    }

    #[test]
    fn enter_sleep_follows_the_strict_shutdown_order() {
        let trace = Trace::default();
        let mut session = TraceSession {
            trace: &trace,
            active: true,
            waiting_gps: false,
        };
        let mut power = TracePower(&trace);
        let mut wireless = TraceWireless(&trace);
        let mut services = TraceServices(&trace);
        let mut suspend = TraceSuspend(&trace);

        scheduler(10, 0).enter_sleep(
            &mut session,
            &mut power,
            &mut wireless,
            &mut services,
            &mut suspend,
        );

        assert_eq!(
            trace.0.borrow().as_slice(),
            &[
                Step::SessionStop,
                Step::PowerOff,
                Step::WirelessOff,
                Step::Yield,
                Step::DeepSleep(600),
            ]
        );
    }

    #[test]
    fn inactive_session_is_not_stopped_again() {
        let trace = Trace::default();
        let mut session = TraceSession {
            trace: &trace,
            active: false,
            waiting_gps: false,
        };
        let mut power = TracePower(&trace);
        let mut wireless = TraceWireless(&trace);
        let mut services = TraceServices(&trace);
        let mut suspend = TraceSuspend(&trace);

        scheduler(10, 0).enter_sleep(
            &mut session,
            &mut power,
            &mut wireless,
            &mut services,
            &mut suspend,
        );

        assert_eq!(
            trace.0.borrow().as_slice(),
            &[
                Step::PowerOff,
                Step::WirelessOff,
                Step::Yield,
                Step::DeepSleep(600),
            ]
        );
    }
}
