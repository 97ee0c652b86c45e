//! Board adapters binding the `tracker-core` capability traits to the
//! STM32G0 peripherals: the modem power rail, the independent watchdog, the
//! battery ADC, the RTT log mirror, and deep-sleep entry.

pub mod power;

pub use power::BatteryMonitor;

use cortex_m::peripheral::SCB;
use embassy_stm32::gpio::Output;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_stm32::peripherals::IWDG;
use embassy_time::{Duration, Instant, block_for};

use tracker_core::clock::Clock;
use tracker_core::io::{Pacer, Watchdog};
use tracker_core::log::LogSink;
use tracker_core::orchestrator::{ModemPower, Suspend, Wireless};

/// Monotonic clock over the Embassy time driver. Zero-sized; construct
/// freely wherever a clock is needed.
#[derive(Copy, Clone, Debug, Default)]
pub struct FirmwareClock;

impl Clock for FirmwareClock {
    fn seconds_since_power_on(&self) -> u64 {
        Instant::now().as_secs()
    }

    fn now_millis(&self) -> u64 {
        Instant::now().as_millis()
    }
}

/// Modem power rail behind a high-side switch; drive high to energize.
pub struct ModemRail {
    pin: Output<'static>,
}

impl ModemRail {
    pub fn new(pin: Output<'static>) -> Self {
        Self { pin }
    }
}

impl ModemPower for ModemRail {
    fn on(&mut self) {
        self.pin.set_high();
    }

    fn off(&mut self) {
        self.pin.set_low();
    }
}

/// IWDG feed. The watchdog reset is the recovery path for a wedged pass, so
/// nothing here ever stops petting deliberately except deep-sleep entry.
pub struct IwdgFeeder {
    watchdog: IndependentWatchdog<'static, IWDG>,
}

impl IwdgFeeder {
    pub fn new(mut watchdog: IndependentWatchdog<'static, IWDG>) -> Self {
        watchdog.unleash();
        Self { watchdog }
    }
}

impl Watchdog for IwdgFeeder {
    fn feed(&mut self) {
        self.watchdog.pet();
    }
}

/// Pacer for the cooperative wait loop. The executor only reschedules at
/// await points, so the sync yield is a no-op and the granule sleep is a
/// short blocking delay.
#[derive(Copy, Clone, Debug, Default)]
pub struct BusyPacer;

impl Pacer for BusyPacer {
    fn yield_now(&mut self) {}

    fn sleep_ms(&mut self, millis: u64) {
        block_for(Duration::from_millis(millis));
    }
}

/// Mirrors debug records to the RTT console.
#[derive(Copy, Clone, Debug, Default)]
pub struct RttSink;

impl LogSink for RttSink {
    fn write(&mut self, text: &str) {
        defmt::info!("{=str}", text);
    }
}

/// The cellular module is the only radio on this board; the local responder
/// is reached through it, so there is no separate interface to disable.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoLocalRadio;

impl Wireless for NoLocalRadio {
    fn disable(&mut self) {}
}

/// Deep-sleep entry via the Cortex-M SLEEPDEEP path.
///
/// The IWDG keeps counting through the sleep and its reset restarts the
/// firmware at reset-handler level, which is the wake contract callers rely
/// on. TODO: arm the RTC wakeup timer with the requested duration once the
/// LSE crystal is fitted, so the sleep length follows configuration instead
/// of the watchdog period.
pub struct StandbySuspend {
    scb: SCB,
}

impl StandbySuspend {
    pub fn new(scb: SCB) -> Self {
        Self { scb }
    }
}

impl Suspend for StandbySuspend {
    fn deep_sleep(&mut self, secs: u64) {
        defmt::info!("deep sleep requested for {=u64}s", secs);
        self.scb.set_sleepdeep();
        loop {
            cortex_m::asm::wfi();
        }
    }
}
