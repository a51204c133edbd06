#![allow(clippy::type_complexity)]

pub mod applications;
pub mod error_model;
pub mod flow_monitor;
pub mod network;
pub mod packet;
pub mod pcap_exporter;
pub mod queue_disc;
pub mod sim;
pub mod stats;
pub mod tcp;
pub mod units;

#[cfg(test)]
mod test {
    use crate::applications::BulkSendConfig;
    use crate::error_model::{BurstErrorModel, RandomStream};
    use crate::flow_monitor::FlowMonitorConfig;
    use crate::network::ip::AddressAllocator;
    use crate::network::mobility::{ConstantPositionModel, Vector3};
    use crate::network::spec::{PointToPointSpec, WifiRole, WifiSpec};
    use crate::network::wifi::phy::{WifiMode, WifiPhyConfig};
    use crate::network::{AppId, DeviceId, DropReason, Network, NetworkConfig, NodeId};
    use crate::pcap_exporter::FileBasedPcapExporterFactory;
    use crate::queue_disc::{QueueDiscError, QueueDiscKind};
    use crate::sim::SimTime;
    use crate::units::DataRate;
    use bon::builder;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    const SINK_PORT: u16 = 9;
    const BANDWIDTH_1_MBPS: u64 = 1_000_000;
    const BANDWIDTH_10_MBPS: u64 = 10_000_000;

    struct TestNetwork {
        network: Network,
        client: NodeId,
        server: NodeId,
        /// The server's end of the link towards the client side
        server_device: DeviceId,
        server_addr: Ipv4Addr,
    }

    fn p2p(bandwidth_bps: u64, delay: Duration) -> PointToPointSpec {
        PointToPointSpec {
            data_rate: DataRate::from_bps(bandwidth_bps),
            delay,
        }
    }

    /// client <-> server, over a single point-to-point link
    #[builder]
    fn point_to_point_network(
        bandwidth_bps: Option<u64>,
        delay: Option<Duration>,
        seed: Option<u64>,
    ) -> TestNetwork {
        let mut network = Network::new(NetworkConfig {
            seed: seed.unwrap_or(1),
            ..NetworkConfig::default()
        })
        .unwrap();

        let client = network.create_node("client");
        let server = network.create_node("server");
        let spec = p2p(
            bandwidth_bps.unwrap_or(BANDWIDTH_10_MBPS),
            delay.unwrap_or(Duration::from_millis(10)),
        );
        let [client_device, server_device] =
            network.install_point_to_point(client, server, &spec).unwrap();
        network.install_internet_stack(client).unwrap();
        network.install_internet_stack(server).unwrap();

        let mut allocator = AddressAllocator::new("10.0.2.0/24".parse().unwrap());
        let addresses = network
            .assign_addresses(&[client_device, server_device], &mut allocator)
            .unwrap();
        network.populate_routing_tables();

        TestNetwork {
            network,
            client,
            server,
            server_device,
            server_addr: addresses[1].address(),
        }
    }

    /// station <-> access point <-> server, with a Wi-Fi cell and a point-to-point link
    #[builder]
    fn wifi_network(seed: Option<u64>, station_distance: Option<f64>) -> TestNetwork {
        let mut network = Network::new(NetworkConfig {
            seed: seed.unwrap_or(1),
            ..NetworkConfig::default()
        })
        .unwrap();

        let server = network.create_node("server");
        let ap = network.create_node("ap");
        let station = network.create_node("station");

        let channel = network
            .add_wifi_channel(WifiSpec {
                phy: WifiPhyConfig::default(),
                data_mode: WifiMode::Ht(7),
                control_mode: WifiMode::Ht(0),
                ssid: "test".to_string(),
                fragmentation_threshold: 2346,
                rts_cts_threshold: 2346,
            })
            .unwrap();
        let ap_wifi = network
            .install_wifi_device(ap, channel, WifiRole::AccessPoint)
            .unwrap();
        let station_wifi = network
            .install_wifi_device(
                station,
                channel,
                WifiRole::Station {
                    active_probing: false,
                },
            )
            .unwrap();
        network
            .install_mobility(ap, ConstantPositionModel::new(Vector3::new(0.0, 0.0, 0.0)))
            .unwrap();
        network
            .install_mobility(
                station,
                ConstantPositionModel::new(Vector3::new(
                    station_distance.unwrap_or(5.0),
                    0.0,
                    0.0,
                )),
            )
            .unwrap();

        let [ap_p2p, server_p2p] = network
            .install_point_to_point(ap, server, &p2p(BANDWIDTH_10_MBPS, Duration::from_millis(2)))
            .unwrap();

        for node in [server, ap, station] {
            network.install_internet_stack(node).unwrap();
        }

        let mut allocator = AddressAllocator::new("10.0.1.0/24".parse().unwrap());
        network
            .assign_addresses(&[station_wifi, ap_wifi], &mut allocator)
            .unwrap();
        allocator.new_network().unwrap();
        let addresses = network
            .assign_addresses(&[ap_p2p, server_p2p], &mut allocator)
            .unwrap();
        network.populate_routing_tables();

        TestNetwork {
            network,
            client: station,
            server,
            server_device: server_p2p,
            server_addr: addresses[1].address(),
        }
    }

    fn install_transfer(net: &mut TestNetwork, max_bytes: u64) -> (AppId, AppId) {
        let sink = net
            .network
            .install_packet_sink(net.server, SINK_PORT, SimTime::ZERO)
            .unwrap();
        let sender = net
            .network
            .install_bulk_send(
                net.client,
                BulkSendConfig {
                    remote: SocketAddrV4::new(net.server_addr, SINK_PORT),
                    send_size: 512,
                    max_bytes,
                },
                SimTime::from_secs(1),
            )
            .unwrap();
        (sender, sink)
    }

    fn received(network: &Network, sink: AppId) -> u64 {
        network
            .application(sink)
            .and_then(|a| a.as_packet_sink())
            .unwrap()
            .total_rx()
    }

    #[test]
    fn test_bulk_transfer_over_point_to_point_link() {
        let mut net = point_to_point_network().call();
        net.network.install_flow_monitor(FlowMonitorConfig::default());
        let (sender, sink) = install_transfer(&mut net, 100_000);

        net.network.run_until(SimTime::from_secs(20));

        assert_eq!(received(&net.network, sink), 100_000);
        let bulk = net.network.application(sender).unwrap().as_bulk_send().unwrap();
        assert_eq!(bulk.total_sent(), 100_000);

        let monitor = net.network.flow_monitor().unwrap();
        let data_flow = &monitor.flow_stats()[&1];
        assert_eq!(data_flow.lost_packets, 0);
        assert!(data_flow.packets_dropped.is_empty());
        assert_eq!(data_flow.tx_packets, data_flow.rx_packets);

        // Both directions of the connection are flows
        assert_eq!(monitor.classifier().flows().count(), 2);
        let tuple = monitor.classifier().find_flow(1).unwrap();
        assert_eq!(tuple.destination_port, SINK_PORT);
        assert_eq!(tuple.destination_address, net.server_addr);
    }

    #[test]
    fn test_packet_arrives_at_expected_time() {
        let mut net = point_to_point_network()
            .bandwidth_bps(BANDWIDTH_1_MBPS)
            .delay(Duration::from_millis(10))
            .call();
        net.network.install_flow_monitor(FlowMonitorConfig::default());
        install_transfer(&mut net, 1000);

        net.network.run_until(SimTime::from_secs(5));

        // The SYN is 44 bytes (with the SACK-permitted option) plus 2 bytes of PPP framing: at
        // 1 Mbps it takes 368 us to serialize, followed by 10 ms of propagation
        let stats = &net.network.flow_monitor().unwrap().flow_stats()[&1];
        assert_eq!(stats.time_first_tx_packet, Some(SimTime::from_secs(1)));
        assert_eq!(
            stats.time_first_rx_packet,
            Some(SimTime::from_secs(1) + Duration::from_micros(10_368))
        );
    }

    #[test]
    fn test_bulk_transfer_through_wifi_cell() {
        let mut net = wifi_network().call();
        net.network.install_flow_monitor(FlowMonitorConfig::default());
        let (_, sink) = install_transfer(&mut net, 200_000);

        net.network.run_until(SimTime::from_secs(20));

        assert_eq!(received(&net.network, sink), 200_000);
        let monitor = net.network.flow_monitor().unwrap();
        let data_flow = &monitor.flow_stats()[&1];

        // Every delivered packet was forwarded once, by the access point
        assert_eq!(data_flow.times_forwarded, data_flow.rx_packets);
        let wifi = net.network.wifi_channel(0).unwrap();
        assert!(wifi.stats().exchanges > 0);
    }

    #[test]
    fn test_out_of_range_station_never_connects() {
        let mut net = wifi_network().station_distance(100_000.0).call();
        let (sender, sink) = install_transfer(&mut net, 10_000);

        net.network.run_until(SimTime::from_secs(5));

        assert_eq!(received(&net.network, sink), 0);
        let bulk = net.network.application(sender).unwrap().as_bulk_send().unwrap();
        assert_eq!(bulk.total_sent(), 0);

        let station_wifi = net.network.node(net.client).unwrap().devices()[0];
        let stats = net.network.device(station_wifi).unwrap().stats();
        assert!(stats.dropped_retry_limit.packets > 0);
        assert!(stats.failed_attempts > 0);
    }

    #[test]
    fn test_transfer_survives_corruption() {
        let mut net = point_to_point_network().call();
        let server_device = net.server_device;
        net.network
            .set_receive_error_model(
                server_device,
                Box::new(BurstErrorModel::new(0.02, RandomStream::new(1, 100))),
            )
            .unwrap();
        net.network.install_flow_monitor(FlowMonitorConfig::default());
        let (_, sink) = install_transfer(&mut net, 200_000);

        net.network.run_until(SimTime::from_secs(60));

        assert_eq!(received(&net.network, sink), 200_000);
        let device = net.network.device(server_device).unwrap();
        assert!(device.stats().dropped_corrupted.packets > 0);

        let monitor = net.network.flow_monitor().unwrap();
        let data_flow = &monitor.flow_stats()[&1];
        assert_eq!(
            data_flow.packets_dropped[&DropReason::Corrupted].packets,
            device.stats().dropped_corrupted.packets
        );
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let run = |seed| {
            let mut net = wifi_network().seed(seed).call();
            net.network.install_flow_monitor(FlowMonitorConfig::default());
            install_transfer(&mut net, 50_000);
            net.network.run_until(SimTime::from_secs(10));

            let stats = &net.network.flow_monitor().unwrap().flow_stats()[&1];
            (
                net.network.processed_events(),
                stats.delay_sum,
                stats.time_last_rx_packet,
            )
        };

        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_applications_need_routing_tables() {
        let mut network = Network::new(NetworkConfig::default()).unwrap();
        let node = network.create_node("lonely");
        network.install_internet_stack(node).unwrap();

        let error = network
            .install_packet_sink(node, SINK_PORT, SimTime::ZERO)
            .unwrap_err();
        assert!(error.to_string().contains("routing tables"));

        network.populate_routing_tables();
        assert!(
            network
                .install_packet_sink(node, SINK_PORT, SimTime::ZERO)
                .is_ok()
        );
    }

    #[test]
    fn test_connection_without_route_does_not_start() {
        let mut net = point_to_point_network().call();
        let sender = net
            .network
            .install_bulk_send(
                net.client,
                BulkSendConfig {
                    remote: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), SINK_PORT),
                    send_size: 512,
                    max_bytes: 0,
                },
                SimTime::ZERO,
            )
            .unwrap();

        net.network.run_until(SimTime::from_secs(1));

        let bulk = net.network.application(sender).unwrap().as_bulk_send().unwrap();
        assert_eq!(bulk.socket(), None);
    }

    #[test]
    fn test_segments_without_socket_are_dropped() {
        let mut net = point_to_point_network().call();
        // Nobody listens on the server
        net.network
            .install_bulk_send(
                net.client,
                BulkSendConfig {
                    remote: SocketAddrV4::new(net.server_addr, SINK_PORT),
                    send_size: 512,
                    max_bytes: 1000,
                },
                SimTime::ZERO,
            )
            .unwrap();

        net.network.run_until(SimTime::from_millis(500));

        let server = net.network.node(net.server).unwrap();
        assert_eq!(server.stats().dropped_no_socket.packets, 1);
    }

    #[test]
    fn test_queue_disc_installation() {
        let mut network = Network::new(NetworkConfig::default()).unwrap();
        let a = network.create_node("a");
        let b = network.create_node("b");
        let [device_a, device_b] = network
            .install_point_to_point(a, b, &p2p(BANDWIDTH_10_MBPS, Duration::from_millis(1)))
            .unwrap();
        network.install_internet_stack(a).unwrap();
        network.install_internet_stack(b).unwrap();

        network
            .install_queue_disc(device_a, QueueDiscKind::CoDel)
            .unwrap();
        assert!(matches!(
            network.install_queue_disc(device_a, QueueDiscKind::PfifoFast),
            Err(QueueDiscError::AlreadyInstalled {
                existing: QueueDiscKind::CoDel,
                ..
            })
        ));
        assert!(matches!(
            network.install_queue_disc(99, QueueDiscKind::PfifoFast),
            Err(QueueDiscError::NoSuchDevice { device: 99 })
        ));

        // Address assignment falls back to the default queue disc
        let mut allocator = AddressAllocator::new("10.0.2.0/24".parse().unwrap());
        network
            .assign_addresses(&[device_a, device_b], &mut allocator)
            .unwrap();
        assert_eq!(network.queue_disc_kind(device_a), Some(QueueDiscKind::CoDel));
        assert_eq!(
            network.queue_disc_kind(device_b),
            Some(QueueDiscKind::PfifoFast)
        );
    }

    #[test]
    fn test_pcap_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = point_to_point_network().call();
        let server_device = net.server_device;
        net.network
            .enable_pcap(
                "server",
                &[server_device],
                &FileBasedPcapExporterFactory {
                    directory: dir.path().to_path_buf(),
                },
            )
            .unwrap();
        install_transfer(&mut net, 5000);

        net.network.run_until(SimTime::from_secs(5));
        assert!(net.network.device(server_device).unwrap().is_capturing());
        net.network.destroy().unwrap();

        // The server's point-to-point device is its first device
        let path = dir.path().join(format!("server-{}-0.pcap", net.server));
        assert!(std::fs::metadata(path).unwrap().len() > 0);
    }
}
