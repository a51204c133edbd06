use serde::Serialize;

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// Packets originated by the node's IP layer
    pub sent: PacketStats,
    /// Packets delivered to the node's transport layer
    pub received: PacketStats,
    pub forwarded: PacketStats,
    pub dropped_no_route: PacketStats,
    pub dropped_ttl_expired: PacketStats,
    pub dropped_no_socket: PacketStats,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub transmitted: PacketStats,
    pub received: PacketStats,
    pub dropped_queue_disc: PacketStats,
    pub dropped_corrupted: PacketStats,
    pub dropped_retry_limit: PacketStats,
    pub dropped_unreachable: PacketStats,
    /// Wi-Fi transmission attempts that failed (collisions and frames lost to noise)
    pub failed_attempts: u64,
}

impl DeviceStats {
    pub fn dropped(&self) -> PacketStats {
        let mut total = PacketStats::default();
        for stats in [
            &self.dropped_queue_disc,
            &self.dropped_corrupted,
            &self.dropped_retry_limit,
            &self.dropped_unreachable,
        ] {
            total.packets += stats.packets;
            total.bytes += stats.bytes;
        }
        total
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PacketStats {
    pub packets: u64,
    pub bytes: usize,
}

impl PacketStats {
    pub fn track_one(&mut self, size_bytes: usize) {
        self.packets += 1;
        self.bytes += size_bytes;
    }
}
