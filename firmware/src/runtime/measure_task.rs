use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Ticker};
use heapless::String;

use super::{CONSOLE_RX, CONSOLE_TX, FirmwareLoop};
use crate::console::{ConsoleSession, REPLY_CAPACITY, frames};

/// Cadence of the cooperative device and loop polling.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[embassy_executor::task]
pub async fn run(mut session: ConsoleSession<FirmwareLoop>) -> ! {
    let console_rx = CONSOLE_RX.receiver();
    let console_tx = CONSOLE_TX.sender();
    let mut ticker = Ticker::every(POLL_INTERVAL);
    let mut reply: String<REPLY_CAPACITY> = String::new();

    loop {
        match select(console_rx.receive(), ticker.next()).await {
            Either::First(frame) => {
                for byte in frame {
                    if let Err(err) = session.ingest(byte, &mut reply) {
                        defmt::warn!("console: {}", err);
                    }
                    if reply.is_empty() {
                        continue;
                    }
                    for packet in frames(&reply) {
                        console_tx.send(packet).await;
                    }
                    reply.clear();
                }
            }
            Either::Second(()) => session.target_mut().poll(),
        }
    }
}
