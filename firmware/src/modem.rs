//! Byte plumbing between the tracker control loop and the SIM808 module.
//!
//! A buffered-UART task owns the wire: it drains the outgoing command queue
//! and assembles incoming bytes into lines on the response queue. The sync
//! session type consumed by the orchestrator only touches the two queues, so
//! it never blocks. AT grammar and NMEA parsing stay on the far side of this
//! boundary; the session tracks just the flags the control loop asks about.

use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use tracker_core::orchestrator::{CommandText, ModemSession, MqttChannel, SmsChannel};

/// Depth of the outgoing command queue.
pub const TX_QUEUE_DEPTH: usize = 4;

/// Depth of the incoming line queue.
pub const RX_QUEUE_DEPTH: usize = 8;

const MODEM_UART_BAUD: u32 = 9_600;
const UART_BUFFER_SIZE: usize = 256;

/// Depth of the queue of text commands awaiting the control loop.
pub const COMMAND_QUEUE_DEPTH: usize = 4;

/// One line on the modem wire, either direction.
pub type LinkLine = CommandText;

pub type TxQueue = Channel<ThreadModeRawMutex, LinkLine, TX_QUEUE_DEPTH>;
pub type RxQueue = Channel<ThreadModeRawMutex, LinkLine, RX_QUEUE_DEPTH>;
pub type CommandChannel = Channel<ThreadModeRawMutex, CommandText, COMMAND_QUEUE_DEPTH>;
pub type CommandSink = Sender<'static, ThreadModeRawMutex, CommandText, COMMAND_QUEUE_DEPTH>;

static mut UART_TX_BUFFER: [u8; UART_BUFFER_SIZE] = [0; UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; UART_BUFFER_SIZE] = [0; UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART2>,
    tx_pin: Peri<'static, hal::peripherals::PA2>,
    rx_pin: Peri<'static, hal::peripherals::PA3>,
    tx_queue: &'static TxQueue,
    rx_queue: &'static RxQueue,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = MODEM_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize modem UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();

    let outgoing = async move {
        loop {
            let line = tx_queue.receive().await;
            if write_all(&mut uart_tx, line.as_bytes()).await
                && write_all(&mut uart_tx, b"\r\n").await
                && uart_tx.flush().await.is_err()
            {
                defmt::warn!("modem: UART flush error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    };

    let incoming = async move {
        let mut chunk = [0u8; 64];
        let mut line = LinkLine::new();
        loop {
            match uart_rx.read(&mut chunk).await {
                Ok(count) if count > 0 => {
                    for &byte in &chunk[..count] {
                        if byte == b'\r' || byte == b'\n' {
                            if !line.is_empty() {
                                if rx_queue.try_send(line.clone()).is_err() {
                                    defmt::warn!("modem: dropping response line (queue full)");
                                }
                                line.clear();
                            }
                        } else if line.push(char::from(byte)).is_err() {
                            defmt::warn!("modem: response line overflow, truncating");
                        }
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    defmt::warn!("modem: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    join(outgoing, incoming).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn write_all<W: Write>(writer: &mut W, data: &[u8]) -> bool {
    let mut written = 0usize;
    while written < data.len() {
        match writer.write(&data[written..]).await {
            Ok(count) if count > 0 => written += count,
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("modem: UART write error");
                Timer::after(Duration::from_millis(5)).await;
                return false;
            }
        }
    }
    true
}

/// Sync face of the modem link, consumed by the control loop.
pub struct LinkModem {
    tx: Sender<'static, ThreadModeRawMutex, LinkLine, TX_QUEUE_DEPTH>,
    rx: Receiver<'static, ThreadModeRawMutex, LinkLine, RX_QUEUE_DEPTH>,
    commands: CommandSink,
    active: bool,
    gps_pending: bool,
    sms_body_next: bool,
}

impl LinkModem {
    pub fn new(
        tx: Sender<'static, ThreadModeRawMutex, LinkLine, TX_QUEUE_DEPTH>,
        rx: Receiver<'static, ThreadModeRawMutex, LinkLine, RX_QUEUE_DEPTH>,
        commands: CommandSink,
    ) -> Self {
        Self {
            tx,
            rx,
            commands,
            active: false,
            gps_pending: false,
            sms_body_next: false,
        }
    }

    fn enqueue(&mut self, text: &str) -> bool {
        let mut line = LinkLine::new();
        if line.push_str(text).is_err() {
            defmt::warn!("modem: command too long, dropped");
            return false;
        }
        self.tx.try_send(line).is_ok()
    }

    fn consume(&mut self, line: &str) {
        if self.sms_body_next {
            self.sms_body_next = false;
            let mut command = CommandText::new();
            if command.push_str(line).is_ok() {
                let _ = self.commands.try_send(command);
            }
            return;
        }

        if let Some(fields) = line.strip_prefix("+CGNSINF:") {
            // Second field is the fix status.
            self.gps_pending = fields.split(',').nth(1).map(str::trim) != Some("1");
        } else if line.starts_with("+CMT:") {
            // Direct-delivery SMS: the body follows on the next line and is
            // treated as a raw device command.
            self.sms_body_next = true;
        } else if line != "OK" {
            defmt::debug!("modem: unsolicited {=str}", line);
        }
    }
}

impl ModemSession for LinkModem {
    fn begin(&mut self) -> bool {
        // Echo off, direct SMS delivery, GNSS power on. The module answers
        // asynchronously; failure here means the queue itself is wedged.
        self.gps_pending = true;
        self.active = self.enqueue("ATE0")
            && self.enqueue("AT+CNMI=2,2")
            && self.enqueue("AT+CGNSPWR=1");
        self.active
    }

    fn stop(&mut self) {
        let _ = self.enqueue("AT+CPOWD=1");
        self.active = false;
        self.gps_pending = false;
    }

    fn handle_client(&mut self) {
        while let Ok(line) = self.rx.try_receive() {
            self.consume(line.as_str());
        }
    }

    fn send_command(&mut self, command: &str) {
        if !self.enqueue(command) {
            defmt::warn!("modem: pass-through dropped (queue full)");
        }
    }

    fn waiting_for_gps(&self) -> bool {
        self.gps_pending
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Service passes between unread-SMS polls.
const SMS_POLL_PASSES: u32 = 40;

/// SMS channel: periodically asks the module for unread messages; the
/// replies come back through the shared response queue.
pub struct SmsLink {
    tx: Sender<'static, ThreadModeRawMutex, LinkLine, TX_QUEUE_DEPTH>,
    passes: u32,
}

impl SmsLink {
    pub fn new(tx: Sender<'static, ThreadModeRawMutex, LinkLine, TX_QUEUE_DEPTH>) -> Self {
        Self { tx, passes: 0 }
    }
}

impl SmsChannel for SmsLink {
    fn handle_client(&mut self) {
        self.passes += 1;
        if self.passes.is_multiple_of(SMS_POLL_PASSES) {
            let mut line = LinkLine::new();
            let _ = line.push_str("AT+CMGL=\"REC UNREAD\"");
            let _ = self.tx.try_send(line);
        }
    }
}

/// MQTT channel: message construction and transport live in the off-board
/// broker pipeline; the firmware side only reports send-pending state.
#[derive(Default)]
pub struct MqttLink {
    in_flight: bool,
}

impl MqttChannel for MqttLink {
    fn handle_client(&mut self) {
        self.in_flight = false;
    }

    fn waiting_for_mqtt(&self) -> bool {
        self.in_flight
    }
}
