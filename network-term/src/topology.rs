//! Nodes, devices and address plan of the scenario
//!
//! A server is reached through an access point over a point-to-point bottleneck link. Three
//! stations share the access point's Wi-Fi cell.

use crate::config::ScenarioConfig;
use in_memory_network::network::ip::{AddressAllocator, Ipv4Cidr};
use in_memory_network::network::mobility::{ConstantPositionModel, ListPositionAllocator, Vector3};
use in_memory_network::network::spec::{PointToPointSpec, WifiRole, WifiSpec};
use in_memory_network::network::wifi::phy::{WifiMode, WifiPhyConfig};
use in_memory_network::network::{ChannelId, DeviceId, Network, NetworkConfig, NodeId};
use std::net::Ipv4Addr;

pub const STATION_COUNT: usize = 3;
pub const SSID: &str = "network";

/// Base of the address allocator; each segment moves on to the next /24 before assigning
pub const ADDRESS_BASE: (Ipv4Addr, u8) = (Ipv4Addr::new(10, 0, 0, 0), 24);

/// Thresholds high enough that fragmentation and RTS/CTS never kick in
const THRESHOLD_DISABLED: u32 = 999_999;

/// Positions handed out in the order access point, stations, server
const POSITIONS: [Vector3; 5] = [
    Vector3::new(0.0, 0.0, 0.0),
    Vector3::new(10.0, 10.0, 0.0),
    Vector3::new(10.0, 0.0, 0.0),
    Vector3::new(0.0, 10.0, 0.0),
    Vector3::new(-10.0, 0.0, 0.0),
];

#[derive(Clone, Debug)]
pub struct Topology {
    pub server: NodeId,
    pub access_point: NodeId,
    pub stations: [NodeId; STATION_COUNT],
    pub wifi_channel: ChannelId,
    pub access_point_wifi: DeviceId,
    pub station_wifi: [DeviceId; STATION_COUNT],
    pub access_point_bottleneck: DeviceId,
    pub server_bottleneck: DeviceId,
}

/// Addresses handed out to the two link segments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressPlan {
    pub infrastructure: Ipv4Cidr,
    pub bottleneck: Ipv4Cidr,
    pub stations: [Ipv4Addr; STATION_COUNT],
    pub access_point_wifi: Ipv4Addr,
    pub access_point_bottleneck: Ipv4Addr,
    pub server: Ipv4Addr,
}

pub fn wifi_spec(data_mode: WifiMode) -> WifiSpec {
    WifiSpec {
        phy: WifiPhyConfig {
            frequency_hz: 5e9,
            tx_power_dbm: 10.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            rx_noise_figure_db: 10.0,
            cca_threshold_dbm: -79.0,
            energy_detection_threshold_dbm: -76.0,
        },
        data_mode,
        control_mode: WifiMode::Ht(0),
        ssid: SSID.to_string(),
        fragmentation_threshold: THRESHOLD_DISABLED,
        rts_cts_threshold: THRESHOLD_DISABLED,
    }
}

impl Topology {
    /// Creates the network with the TCP settings bound, then its nodes and devices
    pub fn build_network(config: &ScenarioConfig) -> anyhow::Result<(Network, Topology)> {
        let mut network = Network::new(NetworkConfig {
            seed: config.seed,
            tcp: config.tcp_config(),
        })?;
        let topology = Self::build(&mut network, config)?;
        Ok((network, topology))
    }

    /// Creates the nodes, the Wi-Fi cell and the bottleneck link, without addresses
    pub fn build(network: &mut Network, config: &ScenarioConfig) -> anyhow::Result<Topology> {
        let server = network.create_node("server");
        let access_point = network.create_node("access-point");
        let stations: [NodeId; STATION_COUNT] =
            std::array::from_fn(|i| network.create_node(format!("station{i}")));

        let mut positions = ListPositionAllocator::new(POSITIONS);
        for node in [access_point].iter().chain(&stations).chain([&server]) {
            let position = positions.next_position()?;
            network.install_mobility(*node, ConstantPositionModel::new(position))?;
        }

        let wifi_channel = network.add_wifi_channel(wifi_spec(config.phy_rate))?;
        let mut station_wifi = [0; STATION_COUNT];
        for (device, &station) in station_wifi.iter_mut().zip(&stations) {
            *device = network.install_wifi_device(
                station,
                wifi_channel,
                WifiRole::Station {
                    active_probing: false,
                },
            )?;
        }
        let access_point_wifi =
            network.install_wifi_device(access_point, wifi_channel, WifiRole::AccessPoint)?;

        for node in [server, access_point].iter().chain(&stations) {
            network.install_internet_stack(*node)?;
        }

        let [access_point_bottleneck, server_bottleneck] = network.install_point_to_point(
            access_point,
            server,
            &PointToPointSpec {
                data_rate: config.bandwidth,
                delay: config.delay,
            },
        )?;

        tracing::debug!(
            "built {} nodes and {} devices",
            network.nodes().len(),
            network.devices().len()
        );

        Ok(Topology {
            server,
            access_point,
            stations,
            wifi_channel,
            access_point_wifi,
            station_wifi,
            access_point_bottleneck,
            server_bottleneck,
        })
    }

    /// The devices of the infrastructure segment, stations first
    pub fn wifi_devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.station_wifi
            .iter()
            .copied()
            .chain([self.access_point_wifi])
    }

    /// The access point end of the bottleneck link, then the server end
    pub fn bottleneck_devices(&self) -> [DeviceId; 2] {
        [self.access_point_bottleneck, self.server_bottleneck]
    }

    /// Gives the infrastructure segment the next block, then the bottleneck segment the one after
    pub fn assign_addresses(&self, network: &mut Network) -> anyhow::Result<AddressPlan> {
        let (base, prefix) = ADDRESS_BASE;
        let mut allocator = AddressAllocator::new(Ipv4Cidr::new(base, prefix)?);

        let wifi_devices: Vec<_> = self.wifi_devices().collect();
        let infrastructure = allocator.new_network()?;
        let wifi = network.assign_addresses(&wifi_devices, &mut allocator)?;

        let bottleneck = allocator.new_network()?;
        let p2p = network.assign_addresses(&self.bottleneck_devices(), &mut allocator)?;

        let plan = AddressPlan {
            infrastructure,
            bottleneck,
            stations: std::array::from_fn(|i| wifi[i].address()),
            access_point_wifi: wifi[STATION_COUNT].address(),
            access_point_bottleneck: p2p[0].address(),
            server: p2p[1].address(),
        };

        tracing::info!(
            "infrastructure segment uses {}, bottleneck uses {}",
            plan.infrastructure,
            plan.bottleneck
        );
        Ok(plan)
    }
}
