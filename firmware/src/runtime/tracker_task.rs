use embassy_futures::yield_now;
use embassy_time::{Duration, Timer};

use crate::hw::{FirmwareClock, RttSink};
use crate::runtime::{FirmwareContext, FirmwareIo};
use tracker_core::log::{DebugLog, RecordOptions};
use tracker_core::orchestrator::PowerOrchestrator;

/// Pause between control-loop passes. Short enough that the modem response
/// queue never backs up, long enough to leave the executor mostly idle.
const PASS_PERIOD_MS: u64 = 50;

#[embassy_executor::task]
pub async fn run(mut ctx: FirmwareContext, mut io: FirmwareIo) -> ! {
    let clock = FirmwareClock;
    let mut log = DebugLog::new(RttSink);
    let mut orchestrator = PowerOrchestrator::new();

    log.record(&clock, &mut io, "tracker firmware up", RecordOptions::line());

    loop {
        orchestrator.tick(&mut ctx, &clock, &mut io, &mut log);
        yield_now().await;
        Timer::after(Duration::from_millis(PASS_PERIOD_MS)).await;
    }
}
