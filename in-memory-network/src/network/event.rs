use crate::network::{AppId, ChannelId, DeviceId, NodeId, SocketId};
use crate::packet::Packet;
use crate::tcp::socket::{SocketNotification, TimerKind};

/// Everything that can happen in the network, as scheduled on its timeline
#[derive(Debug)]
pub(crate) enum NetworkEvent {
    /// A point-to-point device finished serializing its current packet
    TransmitComplete { device: DeviceId },
    /// A packet arrived at the receive side of a device
    Receive { device: DeviceId, packet: Packet },
    /// A packet sent by a node to one of its own addresses
    LoopbackDeliver { node: NodeId, packet: Packet },
    /// The backoff of at least one Wi-Fi device in the cell runs out
    WifiAccess { channel: ChannelId, generation: u64 },
    /// The current Wi-Fi frame exchange (data frame plus ACK or ACK timeout) is over
    WifiExchangeEnd { channel: ChannelId },
    TcpTimer {
        socket: SocketId,
        kind: TimerKind,
        generation: u64,
    },
    AppStart { app: AppId },
    AppNotify {
        app: AppId,
        socket: SocketId,
        notification: SocketNotification,
    },
}
