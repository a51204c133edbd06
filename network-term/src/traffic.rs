//! The single bulk transfer, from the first station to the server

use crate::config::ScenarioConfig;
use crate::topology::{AddressPlan, Topology};
use in_memory_network::applications::BulkSendConfig;
use in_memory_network::network::{AppId, Network};
use in_memory_network::sim::SimTime;
use std::net::SocketAddrV4;

pub const SINK_PORT: u16 = 9;
pub const SINK_START: SimTime = SimTime::ZERO;
pub const SOURCE_START: SimTime = SimTime::from_secs(1);

#[derive(Clone, Copy, Debug)]
pub struct Traffic {
    pub sink: AppId,
    pub source: AppId,
    pub remote: SocketAddrV4,
}

/// Installs the packet sink on the server and the bulk sender on the first station
///
/// Routing tables must be populated first.
pub fn install_traffic(
    network: &mut Network,
    topology: &Topology,
    addresses: &AddressPlan,
    config: &ScenarioConfig,
) -> anyhow::Result<Traffic> {
    let remote = SocketAddrV4::new(addresses.server, SINK_PORT);
    let sink = network.install_packet_sink(topology.server, SINK_PORT, SINK_START)?;
    let source = network.install_bulk_send(
        topology.stations[0],
        BulkSendConfig {
            remote,
            send_size: config.payload_size,
            max_bytes: config.max_bytes,
        },
        SOURCE_START,
    )?;

    tracing::info!(
        "bulk transfer from {} to {remote}, starting at {SOURCE_START}",
        addresses.stations[0]
    );
    Ok(Traffic {
        sink,
        source,
        remote,
    })
}
