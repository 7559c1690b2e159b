use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Flex, Level, Output, Speed};
use static_cell::StaticCell;

use crate::console::{ConsoleChannel, ConsoleSession};
use crate::hw::{EmbassyClock, SensorPins};
use crate::link::{ChannelUart, SensorLink};
use crate::uplink::RttUplink;
use crate::usb;
use pms_core::device::{DebugFlags, Device, DeviceConfig, PinHal, RailTiming};
use pms_core::orchestrator::{LoopConfig, MeasurementLoop, NoBoard};

mod measure_task;
mod sensor_task;
mod usb_task;

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

pub(super) type FirmwareLoop = MeasurementLoop<
    PinHal<SensorPins<'static>>,
    ChannelUart<'static>,
    EmbassyClock,
    RttUplink,
    NoBoard,
>;

pub(super) static SENSOR_LINK: SensorLink = SensorLink::new();
pub(super) static CONSOLE_RX: ConsoleChannel = ConsoleChannel::new();
pub(super) static CONSOLE_TX: ConsoleChannel = ConsoleChannel::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA2,
        PA3,
        PA4,
        PB0,
        PB1,
        USB,
        PA11,
        PA12,
        USART5,
        ..
    } = hal::init(config);

    let pins = SensorPins::new(
        Output::new(PA4, Level::Low, Speed::Low),
        Flex::new(PA3),
        Flex::new(PA2),
    );
    let hal = PinHal::new(
        pins,
        RailTiming::DEFAULT,
        DebugFlags::default() | DebugFlags::INFO,
    );
    let device = Device::new(
        hal,
        ChannelUart::new(&SENSOR_LINK),
        EmbassyClock,
        DeviceConfig::DEFAULT,
    );

    // no RTC backup domain is wired up, so the loop only ever light-sleeps
    let mut measurement: FirmwareLoop =
        MeasurementLoop::new(device, RttUplink::new(), NoBoard, LoopConfig::DEFAULT);
    measurement.begin();
    measurement.request_active(true);

    defmt::info!("pms: measurement loop started");

    spawner
        .spawn(sensor_task::run(&SENSOR_LINK, USART5, PB0, PB1))
        .expect("failed to spawn sensor UART task");

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");

    spawner
        .spawn(measure_task::run(ConsoleSession::new(measurement)))
        .expect("failed to spawn measurement task");

    core::future::pending::<()>().await;
}
