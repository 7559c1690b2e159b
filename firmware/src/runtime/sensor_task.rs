use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::link::{LINK_QUEUE_DEPTH, SensorLink};
use pms_core::device::BAUD_RATE;

const SENSOR_UART_BUFFER_SIZE: usize = LINK_QUEUE_DEPTH;

static mut UART_TX_BUFFER: [u8; SENSOR_UART_BUFFER_SIZE] = [0; SENSOR_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; SENSOR_UART_BUFFER_SIZE] = [0; SENSOR_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    link: &'static SensorLink,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = BAUD_RATE;
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
        .expect("failed to initialize sensor UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();

    let to_sensor = async move {
        let mut pending: Vec<u8, LINK_QUEUE_DEPTH> = Vec::new();
        loop {
            let first = link.to_sensor.receive().await;
            pending.clear();
            let _ = pending.push(first);
            while let Ok(byte) = link.to_sensor.try_receive() {
                if pending.push(byte).is_err() {
                    break;
                }
            }

            if uart_tx.write_all(&pending).await.is_err() {
                defmt::warn!("sensor: UART write error");
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
            if uart_tx.flush().await.is_err() {
                defmt::warn!("sensor: UART flush error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    };

    let from_sensor = async move {
        let mut ingress = [0u8; SENSOR_UART_BUFFER_SIZE];
        loop {
            match uart_rx.read(&mut ingress).await {
                Ok(count) if count > 0 => {
                    let kept = ingress[..count]
                        .iter()
                        .filter(|byte| link.deliver(**byte))
                        .count();
                    if kept < count && link.is_open() {
                        defmt::warn!("sensor: dropped {} bytes (queue full)", count - kept);
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    defmt::warn!("sensor: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    join(to_sensor, from_sensor).await;
    loop {
        core::future::pending::<()>().await;
    }
}
