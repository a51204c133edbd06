use crate::error_model::ErrorModel;
use crate::network::ip::Ipv4Cidr;
use crate::network::link::PointToPointDevice;
use crate::network::spec::WifiRole;
use crate::network::{ChannelId, DeviceId, NodeId};
use crate::pcap_exporter::PcapExporter;
use crate::queue_disc::{QueueDisc, QueueDiscKind};
use crate::stats::DeviceStats;

pub enum DeviceKind {
    Loopback,
    PointToPoint(PointToPointDevice),
    Wifi { channel: ChannelId, role: WifiRole },
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Loopback => "loopback",
            DeviceKind::PointToPoint(_) => "point-to-point",
            DeviceKind::Wifi { .. } => "wifi",
        }
    }
}

/// A network interface card attached to a node
pub struct Device {
    pub(crate) id: DeviceId,
    pub(crate) node: NodeId,
    /// Position of the device among the devices of its node
    pub(crate) index: usize,
    pub(crate) kind: DeviceKind,
    pub(crate) address: Option<Ipv4Cidr>,
    pub(crate) queue_disc: Option<Box<dyn QueueDisc>>,
    pub(crate) receive_error_model: Option<Box<dyn ErrorModel>>,
    pub(crate) pcap: Option<PcapExporter>,
    pub(crate) stats: DeviceStats,
    pub(crate) warned_about_drops: bool,
}

impl Device {
    pub(crate) fn new(id: DeviceId, node: NodeId, index: usize, kind: DeviceKind) -> Self {
        Self {
            id,
            node,
            index,
            kind,
            address: None,
            queue_disc: None,
            receive_error_model: None,
            pcap: None,
            stats: DeviceStats::default(),
            warned_about_drops: false,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn address(&self) -> Option<Ipv4Cidr> {
        self.address
    }

    pub fn channel(&self) -> Option<ChannelId> {
        match &self.kind {
            DeviceKind::Loopback => None,
            DeviceKind::PointToPoint(p2p) => Some(p2p.channel),
            DeviceKind::Wifi { channel, .. } => Some(*channel),
        }
    }

    pub fn queue_disc_kind(&self) -> Option<QueueDiscKind> {
        self.queue_disc.as_ref().map(|q| q.kind())
    }

    pub fn queue_disc(&self) -> Option<&dyn QueueDisc> {
        self.queue_disc.as_deref()
    }

    pub fn receive_error_model_name(&self) -> Option<&'static str> {
        self.receive_error_model.as_ref().map(|m| m.name())
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn is_capturing(&self) -> bool {
        self.pcap.is_some()
    }
}
