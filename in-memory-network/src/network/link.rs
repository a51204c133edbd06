use crate::network::spec::PointToPointSpec;
use crate::network::{ChannelId, DeviceId};
use crate::sim::SimTime;
use crate::units::DataRate;
use std::time::Duration;

/// Bytes added by the PPP framing around every IP packet
pub const PPP_HEADER_BYTES: usize = 2;

/// The transmit side of one end of a point-to-point link
pub struct PointToPointDevice {
    pub(crate) channel: ChannelId,
    pub(crate) peer: DeviceId,
    data_rate: DataRate,
    delay: Duration,
    transmitting: bool,
}

/// When a packet put on the wire leaves the sender and reaches the peer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub complete_at: SimTime,
    pub arrives_at: SimTime,
}

impl PointToPointDevice {
    pub(crate) fn new(channel: ChannelId, peer: DeviceId, spec: &PointToPointSpec) -> Self {
        Self {
            channel,
            peer,
            data_rate: spec.data_rate,
            delay: spec.delay,
            transmitting: false,
        }
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    pub fn peer(&self) -> DeviceId {
        self.peer
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// Puts a packet of `ip_bytes` on the wire
    ///
    /// The device stays busy until [`PointToPointDevice::transmit_complete`] is called.
    pub(crate) fn start_transmission(&mut self, ip_bytes: usize, now: SimTime) -> Transmission {
        debug_assert!(!self.transmitting);
        self.transmitting = true;

        let serialization = self
            .data_rate
            .transmission_time(ip_bytes + PPP_HEADER_BYTES);
        let complete_at = now + serialization;
        Transmission {
            complete_at,
            arrives_at: complete_at + self.delay,
        }
    }

    pub(crate) fn transmit_complete(&mut self) {
        self.transmitting = false;
    }
}

/// The wire between two point-to-point devices
pub struct PointToPointChannel {
    pub(crate) devices: [DeviceId; 2],
    pub(crate) delay: Duration,
}

impl PointToPointChannel {
    pub(crate) fn new(devices: [DeviceId; 2], spec: &PointToPointSpec) -> Self {
        Self {
            devices,
            delay: spec.delay,
        }
    }

    pub fn devices(&self) -> [DeviceId; 2] {
        self.devices
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serialization_and_propagation() {
        // 1 Mbps: every byte takes 8 us
        let spec = PointToPointSpec {
            data_rate: DataRate::from_bps(1_000_000),
            delay: Duration::from_millis(5),
        };
        let mut device = PointToPointDevice::new(0, 1, &spec);
        let transmission = device.start_transmission(998, SimTime::from_secs(1));

        // 998 bytes plus the PPP header
        assert_eq!(
            transmission.complete_at,
            SimTime::from_secs(1) + Duration::from_millis(8)
        );
        assert_eq!(
            transmission.arrives_at,
            SimTime::from_secs(1) + Duration::from_millis(13)
        );
        assert!(device.is_transmitting());

        device.transmit_complete();
        assert!(!device.is_transmitting());
    }
}
