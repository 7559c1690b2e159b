use super::{CONSOLE_RX, CONSOLE_TX, USB_STORAGE};
use crate::console::ConsoleFrame;
use crate::usb::{self, ConsolePort, ConsoleStrings};
use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::{Driver, EndpointError};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let (mut device, port) = usb::build(driver, storage, ConsoleStrings::default());

    join(device.run(), serve_console(port)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

/// Pumps packets between the CDC endpoints and the console channels,
/// starting over whenever the host drops DTR or the bus resets.
async fn serve_console<D: Driver<'static>>(port: ConsolePort<D>) -> ! {
    let ConsolePort {
        mut sender,
        mut receiver,
        control,
    } = port;
    let console_rx = CONSOLE_RX.sender();
    let console_tx = CONSOLE_TX.receiver();
    let mut packet = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut pending_tx: Option<ConsoleFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        pending_tx.take();
        CONSOLE_TX.clear();

        defmt::info!("usb: console connected");

        loop {
            match select3(
                receiver.read_packet(&mut packet),
                async {
                    let frame = match pending_tx.take() {
                        Some(frame) => frame,
                        None => console_tx.receive().await,
                    };
                    let result = sender.write_packet(&frame).await;
                    if result.is_err() {
                        pending_tx = Some(frame);
                    }
                    result
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(count)) => {
                    if count == 0 {
                        continue;
                    }

                    let mut frame = ConsoleFrame::new();
                    if frame.extend_from_slice(&packet[..count]).is_err() {
                        defmt::warn!("usb: dropping console frame len={} (overflow)", count);
                        continue;
                    }

                    console_rx.send(frame).await;
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console interface disabled");
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: console read error");
                }
                Either3::Second(Ok(())) => {}
                Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console write disabled");
                    break;
                }
                Either3::Second(Err(_)) => {
                    defmt::warn!("usb: console write error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: console host dropped DTR");
                        pending_tx.take();
                        break;
                    }
                }
            }
        }
    }
}

async fn wait_for_dtr<D: Driver<'static>>(
    control: &ControlChanged<'static>,
    sender: &Sender<'static, D>,
) {
    while !sender.dtr() {
        control.control_changed().await;
    }
}
