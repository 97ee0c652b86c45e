//! Cooperative wait/service primitive.
//!
//! The whole system runs on one logical thread, so any delay must keep two
//! things alive: the local network responder (otherwise its peer sees a hung
//! device) and the hardware watchdog (otherwise the device resets). This
//! module owns that contract. Direct blocking sleeps are forbidden anywhere
//! else in the tree; every wait goes through [`IdleService::wait_ms`].

use crate::clock::Clock;

/// Service passes performed per internal wait tick and per log record.
pub const SERVICE_BURST: usize = 3;

/// Smallest sleep granule between elapsed-time re-checks, in milliseconds.
pub const WAIT_GRANULE_MS: u64 = 1;

/// Local network responder. Callable many times per second; each call must
/// be non-blocking and idempotent.
pub trait Responder {
    fn handle_client(&mut self);
}

/// Hardware watchdog feed. Not feeding it within its configured timeout
/// resets the device; that reset is the system's fail-safe, not an error
/// reported here.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Scheduler hooks: a cooperative yield and a minimal blocking sleep.
pub trait Pacer {
    fn yield_now(&mut self);
    fn sleep_ms(&mut self, millis: u64);
}

/// Injected capability every component waits through.
pub trait IdleService {
    /// Services the responder exactly once and feeds the watchdog.
    fn service_once(&mut self);

    /// Yields control to the scheduler once.
    fn yield_once(&mut self);

    /// Waits for `duration_ms`, servicing the responder and feeding the
    /// watchdog on every internal pass.
    fn wait_ms(&mut self, duration_ms: u64);
}

/// Concrete [`IdleService`] composed from the injected capabilities.
pub struct CooperativeIo<C, R, W, P> {
    clock: C,
    responder: R,
    watchdog: W,
    pacer: P,
}

impl<C, R, W, P> CooperativeIo<C, R, W, P>
where
    C: Clock,
    R: Responder,
    W: Watchdog,
    P: Pacer,
{
    pub fn new(clock: C, responder: R, watchdog: W, pacer: P) -> Self {
        Self {
            clock,
            responder,
            watchdog,
            pacer,
        }
    }

    /// Accesses the responder, e.g. to drain requests it has queued.
    pub fn responder_mut(&mut self) -> &mut R {
        &mut self.responder
    }
}

impl<C, R, W, P> IdleService for CooperativeIo<C, R, W, P>
where
    C: Clock,
    R: Responder,
    W: Watchdog,
    P: Pacer,
{
    fn service_once(&mut self) {
        self.responder.handle_client();
        self.watchdog.feed();
    }

    fn yield_once(&mut self) {
        self.pacer.yield_now();
    }

    fn wait_ms(&mut self, duration_ms: u64) {
        let start = self.clock.now_millis();
        while self.clock.now_millis().saturating_sub(start) < duration_ms {
            for _ in 0..SERVICE_BURST {
                self.service_once();
            }
            self.watchdog.feed();
            self.pacer.yield_now();
            self.pacer.sleep_ms(WAIT_GRANULE_MS);
        }
    }
}

/// Responder that ignores every service call. Useful in tests and in
/// deployments without the local web endpoint.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopResponder;

impl Responder for NoopResponder {
    fn handle_client(&mut self) {}
}

/// Watchdog stand-in for hosts without one.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn feed(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::{
        CooperativeIo, IdleService, Pacer, Responder, SERVICE_BURST, WAIT_GRANULE_MS, Watchdog,
    };
    use crate::clock::Clock;
    use core::cell::Cell;

    /// Clock that advances only when the pacer sleeps, mimicking the real
    /// relationship between the wait loop and wall time.
    struct SteppedClock<'a> {
        millis: &'a Cell<u64>,
    }

    impl Clock for SteppedClock<'_> {
        fn seconds_since_power_on(&self) -> u64 {
            self.millis.get() / 1_000
        }

        fn now_millis(&self) -> u64 {
            self.millis.get()
        }
    }

    #[derive(Default)]
    struct CountingResponder {
        calls: usize,
    }

    impl Responder for &mut CountingResponder {
        fn handle_client(&mut self) {
            self.calls += 1;
        }
    }

    #[derive(Default)]
    struct CountingWatchdog {
        feeds: usize,
    }

    impl Watchdog for &mut CountingWatchdog {
        fn feed(&mut self) {
            self.feeds += 1;
        }
    }

    struct SteppingPacer<'a> {
        millis: &'a Cell<u64>,
        yields: usize,
        sleeps: usize,
    }

    impl Pacer for SteppingPacer<'_> {
        fn yield_now(&mut self) {
            self.yields += 1;
        }

        fn sleep_ms(&mut self, millis: u64) {
            self.sleeps += 1;
            self.millis.set(self.millis.get() + millis);
        }
    }

    #[test]
    fn service_once_touches_responder_and_watchdog_once() {
        let millis = Cell::new(0);
        let mut responder = CountingResponder::default();
        let mut watchdog = CountingWatchdog::default();
        {
            let mut io = CooperativeIo::new(
                SteppedClock { millis: &millis },
                &mut responder,
                &mut watchdog,
                SteppingPacer {
                    millis: &millis,
                    yields: 0,
                    sleeps: 0,
                },
            );
            io.service_once();
        }
        assert_eq!(responder.calls, 1);
        assert_eq!(watchdog.feeds, 1);
    }

    #[test]
    fn wait_services_and_feeds_on_every_pass() {
        let millis = Cell::new(0);
        let mut responder = CountingResponder::default();
        let mut watchdog = CountingWatchdog::default();
        {
            let mut io = CooperativeIo::new(
                SteppedClock { millis: &millis },
                &mut responder,
                &mut watchdog,
                SteppingPacer {
                    millis: &millis,
                    yields: 0,
                    sleeps: 0,
                },
            );
            io.wait_ms(5);
        }

        let passes = (5 / WAIT_GRANULE_MS) as usize;
        assert_eq!(responder.calls, passes * SERVICE_BURST);
        // One feed per service call plus one standalone feed per pass.
        assert_eq!(watchdog.feeds, passes * (SERVICE_BURST + 1));
        assert_eq!(millis.get(), 5);
    }

    #[test]
    fn zero_wait_returns_immediately() {
        let millis = Cell::new(7);
        let mut responder = CountingResponder::default();
        let mut watchdog = CountingWatchdog::default();
        {
            let mut io = CooperativeIo::new(
                SteppedClock { millis: &millis },
                &mut responder,
                &mut watchdog,
                SteppingPacer {
                    millis: &millis,
                    yields: 0,
                    sleeps: 0,
                },
            );
            io.wait_ms(0);
        }
        assert_eq!(responder.calls, 0);
        assert_eq!(millis.get(), 7);
    }
}
