use crate::network::DeviceId;
use crate::network::ip::Ipv4Cidr;
use crate::network::mobility::ConstantPositionModel;
use crate::network::route::RoutingTable;
use crate::stats::NodeStats;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// An IPv4 address bound to one of the node's devices
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub device: DeviceId,
    pub address: Ipv4Cidr,
}

pub struct Node {
    pub(crate) id: Arc<str>,
    /// The node's devices, in installation order (their index is the node-local device number)
    pub(crate) devices: Vec<DeviceId>,
    pub(crate) interfaces: Vec<Interface>,
    pub(crate) routing_table: RoutingTable,
    pub(crate) mobility: Option<ConstantPositionModel>,
    pub(crate) internet_stack: bool,
    pub(crate) next_ephemeral_port: u16,
    pub(crate) stats: NodeStats,
}

impl Node {
    pub(crate) const FIRST_EPHEMERAL_PORT: u16 = 49153;

    pub(crate) fn new(id: Arc<str>) -> Self {
        Self {
            id,
            devices: Vec::new(),
            interfaces: Vec::new(),
            routing_table: RoutingTable::default(),
            mobility: None,
            internet_stack: false,
            next_ephemeral_port: Self::FIRST_EPHEMERAL_PORT,
            stats: NodeStats::default(),
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Non-loopback addresses, in assignment order
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces
            .iter()
            .map(|i| i.address.address())
            .filter(|a| !a.is_loopback())
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn mobility(&self) -> Option<&ConstantPositionModel> {
        self.mobility.as_ref()
    }

    pub fn has_internet_stack(&self) -> bool {
        self.internet_stack
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub(crate) fn owns_address(&self, address: Ipv4Addr) -> bool {
        address.is_loopback() || self.interfaces.iter().any(|i| i.address.address() == address)
    }

    pub(crate) fn allocate_port(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = self
            .next_ephemeral_port
            .checked_add(1)
            .unwrap_or(Self::FIRST_EPHEMERAL_PORT);
        port
    }
}
