//! Queueing disciplines sitting between the IP layer and a device's transmit path

mod codel;
mod pfifo_fast;

pub use codel::{CoDel, CoDelConfig};
pub use pfifo_fast::PfifoFast;

use crate::network::DeviceId;
use crate::packet::Packet;
use crate::sim::SimTime;
use crate::stats::PacketStats;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

/// A packet waiting for its device, together with the hop it is addressed to
#[derive(Clone, Debug)]
pub struct QueueItem {
    pub packet: Packet,
    pub next_hop: Ipv4Addr,
    pub enqueued_at: SimTime,
}

impl QueueItem {
    pub fn size(&self) -> usize {
        self.packet.size()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueueDiscKind {
    PfifoFast,
    CoDel,
}

impl QueueDiscKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueueDiscKind::PfifoFast => "PfifoFast",
            QueueDiscKind::CoDel => "CoDel",
        }
    }

    pub fn build(&self) -> Box<dyn QueueDisc> {
        match self {
            QueueDiscKind::PfifoFast => Box::new(PfifoFast::default()),
            QueueDiscKind::CoDel => Box::new(CoDel::new(CoDelConfig::default())),
        }
    }
}

impl Display for QueueDiscKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait QueueDisc: Send {
    fn kind(&self) -> QueueDiscKind;

    /// Stores the item, or hands it back if it had to be dropped
    fn enqueue(&mut self, item: QueueItem) -> Result<(), QueueItem>;

    /// Returns the next item to transmit
    ///
    /// Items the discipline decides to drop on the way out are pushed to `dropped`.
    fn dequeue(&mut self, now: SimTime, dropped: &mut Vec<QueueItem>) -> Option<QueueItem>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> &QueueDiscStats;
}

#[derive(Clone, Debug, Default)]
pub struct QueueDiscStats {
    pub enqueued: PacketStats,
    pub dequeued: PacketStats,
    pub dropped_before_enqueue: PacketStats,
    pub dropped_after_dequeue: PacketStats,
    pub max_len: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueDiscError {
    #[error("device {device} already has a {existing} root queue disc")]
    AlreadyInstalled {
        device: DeviceId,
        existing: QueueDiscKind,
    },
    #[error("device {device} does not exist or cannot carry a queue disc")]
    NoSuchDevice { device: DeviceId },
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::QueueItem;
    use crate::packet::{Ipv4Header, Packet, TcpHeader};
    use crate::sim::SimTime;
    use std::net::Ipv4Addr;

    pub fn item(uid: u64, tos: u8, enqueued_at: SimTime) -> QueueItem {
        let mut item = item_with_payload(uid, 100, enqueued_at);
        item.packet.ip.tos = tos;
        item
    }

    pub fn item_with_payload(uid: u64, payload_len: u32, enqueued_at: SimTime) -> QueueItem {
        QueueItem {
            packet: Packet {
                uid,
                ip: Ipv4Header {
                    source: Ipv4Addr::new(10, 0, 1, 1),
                    destination: Ipv4Addr::new(10, 0, 2, 2),
                    ttl: 64,
                    tos: 0,
                    sent_at: enqueued_at,
                },
                tcp: TcpHeader::default(),
                payload_len,
                retransmission: false,
            },
            next_hop: Ipv4Addr::new(10, 0, 2, 2),
            enqueued_at,
        }
    }
}
