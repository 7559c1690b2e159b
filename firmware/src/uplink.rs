//! Uplink stand-in that reports each message over the RTT log.
//!
//! Boards without a radio still run the full measurement cycle; the encoded
//! message is printed so it can be decoded on the host.

use pms_core::uplink::Uplink;

/// Uplink that logs the message and completes on the next poll.
#[derive(Debug, Default)]
pub struct RttUplink {
    in_flight: bool,
    sent: u32,
}

impl RttUplink {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            in_flight: false,
            sent: 0,
        }
    }

    /// Messages handed over since boot.
    #[must_use]
    pub const fn sent(&self) -> u32 {
        self.sent
    }
}

/// Returned when a message is started while the previous one is in flight.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct UplinkBusy;

impl Uplink for RttUplink {
    type Error = UplinkBusy;

    fn start(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), UplinkBusy> {
        if self.in_flight {
            return Err(UplinkBusy);
        }
        self.sent = self.sent.wrapping_add(1);
        self.in_flight = true;

        #[cfg(target_os = "none")]
        defmt::info!(
            "uplink #{} port={} confirmed={} {=[u8]:02x}",
            self.sent,
            port,
            confirmed,
            payload
        );
        #[cfg(not(target_os = "none"))]
        let _ = (port, payload, confirmed);

        Ok(())
    }

    fn poll_complete(&mut self) -> Option<bool> {
        core::mem::take(&mut self.in_flight).then_some(true)
    }
}
