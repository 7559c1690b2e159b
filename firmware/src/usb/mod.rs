//! USB CDC ACM device carrying the operator console.

use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, UsbDevice};

pub const MAX_PACKET_SIZE: u16 = 64;

/// pid.codes test VID/PID.
const VENDOR_ID: u16 = 0x1209;
const PRODUCT_ID: u16 = 0x0001;
const MAX_POWER_MA: u16 = 100;

const CONTROL_LEN: usize = 64;
const DESCRIPTOR_LEN: usize = 256;

/// Descriptor strings for the console device.
#[derive(Clone, Copy, Debug)]
pub struct ConsoleStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for ConsoleStrings {
    fn default() -> Self {
        Self {
            manufacturer: "PMS Node",
            product: "PMS7003 Air Quality Monitor",
            serial_number: None,
        }
    }
}

/// Buffers the USB stack borrows for the lifetime of the device.
pub struct UsbDeviceStorage {
    control: [u8; CONTROL_LEN],
    config: [u8; DESCRIPTOR_LEN],
    bos: [u8; DESCRIPTOR_LEN],
    msos: [u8; DESCRIPTOR_LEN],
    cdc: State<'static>,
}

impl UsbDeviceStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            control: [0; CONTROL_LEN],
            config: [0; DESCRIPTOR_LEN],
            bos: [0; DESCRIPTOR_LEN],
            msos: [0; DESCRIPTOR_LEN],
            cdc: State::new(),
        }
    }
}

impl Default for UsbDeviceStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Console endpoints after the class is split.
pub struct ConsolePort<D: Driver<'static>> {
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

/// Builds the device with its single console interface.
pub fn build<D: Driver<'static>>(
    driver: D,
    storage: &'static mut UsbDeviceStorage,
    strings: ConsoleStrings,
) -> (UsbDevice<'static, D>, ConsolePort<D>) {
    let mut config = Config::new(VENDOR_ID, PRODUCT_ID);
    config.manufacturer = Some(strings.manufacturer);
    config.product = Some(strings.product);
    config.serial_number = strings.serial_number;
    config.max_packet_size_0 = 64;
    config.max_power = MAX_POWER_MA;

    let mut builder = Builder::new(
        driver,
        config,
        &mut storage.config,
        &mut storage.bos,
        &mut storage.msos,
        &mut storage.control,
    );
    let class = CdcAcmClass::new(&mut builder, &mut storage.cdc, MAX_PACKET_SIZE);
    let (sender, receiver, control) = class.split_with_control();

    (
        builder.build(),
        ConsolePort {
            sender,
            receiver,
            control,
        },
    )
}
