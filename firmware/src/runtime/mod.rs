use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::wdg::IndependentWatchdog;

use crate::hw::{
    BatteryMonitor, BusyPacer, FirmwareClock, IwdgFeeder, ModemRail, NoLocalRadio, StandbySuspend,
};
use crate::modem::{self, LinkModem, MqttLink, SmsLink};
use tracker_core::io::{CooperativeIo, NoopResponder};
use tracker_core::orchestrator::{CommandQueue, CommandText, TrackerConfig, TrackerContext};
use tracker_core::sleep::SleepConfig;

mod tracker_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// IWDG window; generous next to the one-millisecond wait granule so only a
/// genuinely wedged pass trips the reset.
const WATCHDOG_TIMEOUT_US: u32 = 8_000_000;

static MODEM_TX: modem::TxQueue = modem::TxQueue::new();
static MODEM_RX: modem::RxQueue = modem::RxQueue::new();
static TEXT_COMMANDS: modem::CommandChannel = modem::CommandChannel::new();

/// Pending text commands, fed by SMS delivery and drained one per pass.
pub struct SharedCommands(&'static modem::CommandChannel);

impl CommandQueue for SharedCommands {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn remove_head(&mut self) -> Option<CommandText> {
        self.0.try_receive().ok()
    }
}

pub type FirmwareIo = CooperativeIo<FirmwareClock, NoopResponder, IwdgFeeder, BusyPacer>;

pub type FirmwareContext = TrackerContext<
    ModemRail,
    LinkModem,
    MqttLink,
    SmsLink,
    BatteryMonitor,
    SharedCommands,
    NoLocalRadio,
    StandbySuspend,
>;

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA2,
        PA3,
        PB5,
        ADC1,
        IWDG,
        USART2,
        ..
    } = hal::init(config);
    let core = cortex_m::Peripherals::take().expect("core peripherals taken once");

    spawner
        .spawn(modem::run(USART2, PA2, PA3, &MODEM_TX, &MODEM_RX))
        .expect("failed to spawn modem link task");

    let ctx = TrackerContext {
        config: TrackerConfig {
            gsm_power: true,
            sms_enabled: true,
            mqtt_enabled: true,
            sleep: SleepConfig {
                active_secs: 600,
                low_battery_millivolts: 3_500,
                sleep_secs: 3_600,
            },
        },
        modem_power: ModemRail::new(Output::new(PB5, Level::Low, Speed::Low)),
        session: LinkModem::new(
            MODEM_TX.sender(),
            MODEM_RX.receiver(),
            TEXT_COMMANDS.sender(),
        ),
        mqtt: MqttLink::default(),
        sms: SmsLink::new(MODEM_TX.sender()),
        sensors: BatteryMonitor::new(Adc::new(ADC1), PA0),
        commands: SharedCommands(&TEXT_COMMANDS),
        wireless: NoLocalRadio,
        suspend: StandbySuspend::new(core.SCB),
    };

    let io = CooperativeIo::new(
        FirmwareClock,
        NoopResponder,
        IwdgFeeder::new(IndependentWatchdog::new(IWDG, WATCHDOG_TIMEOUT_US)),
        BusyPacer,
    );

    spawner
        .spawn(tracker_task::run(ctx, io))
        .expect("failed to spawn tracker control task");

    core::future::pending::<()>().await;
}
