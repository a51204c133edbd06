use crate::config::ScenarioConfig;
use crate::topology::{AddressPlan, Topology};
use crate::traffic::Traffic;
use crate::{loss, queueing, traffic, util};
use anyhow::Context;
use in_memory_network::flow_monitor::{FiveTuple, FlowId, FlowMonitorConfig, FlowStats};
use in_memory_network::network::Network;
use in_memory_network::pcap_exporter::FileBasedPcapExporterFactory;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

pub const FLOW_MONITOR_FILE: &str = "network-term.flowmonitor";

/// What a finished run leaves behind, gathered before the network is torn down
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub flows: Vec<(FlowId, FiveTuple, FlowStats)>,
    /// The flow carrying the bulk transfer's data towards the sink
    pub data_flow: Option<(FlowId, FiveTuple, FlowStats)>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub accepted_connections: usize,
    pub processed_events: u64,
    pub flow_monitor_path: PathBuf,
}

pub fn run(config: &ScenarioConfig) -> anyhow::Result<RunSummary> {
    util::print_params(config);

    let (mut network, topology) = Topology::build_network(config)?;
    tracing::debug!(
        access_point = topology.access_point,
        channel = topology.wifi_channel,
        "Wi-Fi cell ready"
    );
    queueing::install_queue_discs(&mut network, &topology, config.queue_disc)?;
    loss::install_loss_model(&mut network, &topology, config.error_p, config.seed)?;
    let addresses = topology.assign_addresses(&mut network)?;
    network.populate_routing_tables();
    let traffic = traffic::install_traffic(&mut network, &topology, &addresses, config)?;

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    if config.pcap {
        enable_pcap(&mut network, &topology, config)?;
    }
    network.install_flow_monitor(FlowMonitorConfig::default());

    let start = Instant::now();
    network.run_until(config.stop_time());
    tracing::info!(
        "processed {} events in {:.2}s",
        network.processed_events(),
        start.elapsed().as_secs_f64()
    );

    let flow_monitor_path = config.output_dir.join(FLOW_MONITOR_FILE);
    let monitor = network
        .flow_monitor()
        .context("the flow monitor was not installed")?;
    monitor.serialize_to_json_file(&flow_monitor_path, true, true)?;

    let summary = summarize(&network, &addresses, &traffic, flow_monitor_path)?;
    print_report(&network, &summary);

    network.destroy()?;
    Ok(summary)
}

fn enable_pcap(
    network: &mut Network,
    topology: &Topology,
    config: &ScenarioConfig,
) -> anyhow::Result<()> {
    let factory = FileBasedPcapExporterFactory {
        directory: config.output_dir.clone(),
    };
    network.enable_pcap("AccessPoint", &[topology.access_point_wifi], &factory)?;
    network.enable_pcap("Station", &topology.station_wifi, &factory)?;
    network.enable_pcap("server", &topology.bottleneck_devices(), &factory)?;
    Ok(())
}

fn summarize(
    network: &Network,
    addresses: &AddressPlan,
    traffic: &Traffic,
    flow_monitor_path: PathBuf,
) -> anyhow::Result<RunSummary> {
    let monitor = network
        .flow_monitor()
        .context("the flow monitor was not installed")?;
    let flows: Vec<_> = monitor
        .classifier()
        .flows()
        .filter_map(|(id, tuple)| Some((id, tuple, monitor.flow_stats().get(&id)?.clone())))
        .collect();

    let data_flow = flows
        .iter()
        .find(|(_, tuple, _)| {
            tuple.source_address == addresses.stations[0]
                && tuple.destination_address == *traffic.remote.ip()
                && tuple.destination_port == traffic.remote.port()
        })
        .cloned();

    let bytes_sent = network
        .application(traffic.source)
        .and_then(|app| app.as_bulk_send())
        .map(|app| app.total_sent())
        .context("the bulk sender is missing")?;
    let sink = network
        .application(traffic.sink)
        .and_then(|app| app.as_packet_sink())
        .context("the packet sink is missing")?;

    Ok(RunSummary {
        flows,
        data_flow,
        bytes_sent,
        bytes_received: sink.total_rx(),
        accepted_connections: sink.accepted_sockets().len(),
        processed_events: network.processed_events(),
        flow_monitor_path,
    })
}

fn print_report(network: &Network, summary: &RunSummary) {
    println!("--- Flows ---");
    for (id, tuple, stats) in &summary.flows {
        util::print_flow_stats(*id, tuple, stats);
    }

    println!("--- Transfer ---");
    println!("* Bytes written by the sender: {}", summary.bytes_sent);
    println!("* Bytes received by the sink: {}", summary.bytes_received);
    println!(
        "* Connections accepted by the sink: {}",
        summary.accepted_connections
    );
    match &summary.data_flow {
        Some((id, _, _)) => println!("* Data flow: {id}"),
        None => println!("* Data flow: none (the connection never carried data)"),
    }

    util::print_node_stats(network);
    util::print_device_stats(network);

    println!("--- Output ---");
    println!("* Processed events: {}", summary.processed_events);
    println!(
        "* Flow statistics written to {}",
        summary.flow_monitor_path.display()
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ParameterSet;
    use crate::traffic::{SINK_PORT, SOURCE_START};
    use in_memory_network::network::DropReason;
    use in_memory_network::sim::SimTime;
    use std::path::Path;

    fn config(output_dir: &Path, params: ParameterSet) -> ScenarioConfig {
        ScenarioConfig::validate(&ParameterSet {
            output_dir: output_dir.to_path_buf(),
            ..params
        })
        .unwrap()
    }

    fn short_run() -> ParameterSet {
        ParameterSet {
            bandwidth: "10Mbps".to_string(),
            delay: "2ms".to_string(),
            simulation_time: 5.0,
            max_bytes: 100_000,
            ..ParameterSet::default()
        }
    }

    #[test]
    fn test_end_to_end_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&config(
            dir.path(),
            ParameterSet {
                error_p: 0.0,
                ..short_run()
            },
        ))
        .unwrap();

        assert_eq!(summary.bytes_sent, 100_000);
        assert_eq!(summary.bytes_received, 100_000);
        assert_eq!(summary.accepted_connections, 1);

        // The data flow and the ACKs flowing back
        assert_eq!(summary.flows.len(), 2);
        let to_sink = summary
            .flows
            .iter()
            .filter(|(_, tuple, _)| tuple.destination_port == SINK_PORT)
            .count();
        assert_eq!(to_sink, 1);
        let (_, tuple, stats) = summary.data_flow.unwrap();
        assert_eq!(tuple.source_address.octets(), [10, 0, 1, 1]);
        assert_eq!(tuple.destination_address.octets(), [10, 0, 2, 2]);
        assert_eq!(tuple.destination_port, SINK_PORT);
        assert_eq!(stats.time_first_tx_packet, Some(SOURCE_START));
        assert!(stats.rx_packets > 0);
        assert!(stats.tx_bytes >= 100_000);

        assert!(summary.flow_monitor_path.exists());
        let written = fs::read_to_string(&summary.flow_monitor_path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["flowStats"].as_array().unwrap().len(), 2);
        assert_eq!(json["ipv4FlowClassifier"].as_array().unwrap().len(), 2);
        assert!(json["flowProbes"].as_array().is_some());
        assert!(json["flowStats"][0]["delayHistogram"].is_object());
    }

    #[test]
    fn test_transfer_survives_bottleneck_losses() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&config(
            dir.path(),
            ParameterSet {
                error_p: 0.02,
                simulation_time: 20.0,
                ..short_run()
            },
        ))
        .unwrap();

        assert_eq!(summary.bytes_received, 100_000);

        let (data_id, _, data_stats) = summary.data_flow.unwrap();
        assert!(data_stats.packets_dropped[&DropReason::Corrupted].packets > 0);

        // ACKs travel back towards the access point, which has no error model
        let ack_flows: Vec<_> = summary
            .flows
            .iter()
            .filter(|(id, _, _)| *id != data_id)
            .collect();
        assert_eq!(ack_flows.len(), 1);
        let (_, _, ack_stats) = ack_flows[0];
        assert!(!ack_stats.packets_dropped.contains_key(&DropReason::Corrupted));
    }

    #[test]
    fn test_delay_based_aqm_run() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&config(
            dir.path(),
            ParameterSet {
                queue_disc_type: "delay-based-AQM".to_string(),
                tcp_variant: "TcpWestwoodPlus".to_string(),
                error_p: 0.0,
                ..short_run()
            },
        ))
        .unwrap();

        assert_eq!(summary.bytes_received, 100_000);
    }

    #[test]
    fn test_same_parameters_same_statistics() {
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();

        let first = run(&config(first_dir.path(), short_run())).unwrap();
        let second = run(&config(second_dir.path(), short_run())).unwrap();

        assert_eq!(first.processed_events, second.processed_events);
        assert_eq!(
            fs::read_to_string(&first.flow_monitor_path).unwrap(),
            fs::read_to_string(&second.flow_monitor_path).unwrap()
        );
    }

    #[test]
    fn test_pcap_files_are_named_per_device() {
        let dir = tempfile::tempdir().unwrap();
        run(&config(
            dir.path(),
            ParameterSet {
                pcap: true,
                simulation_time: 2.0,
                max_bytes: 10_000,
                ..short_run()
            },
        ))
        .unwrap();

        for name in [
            "AccessPoint-1-0.pcap",
            "Station-2-0.pcap",
            "Station-3-0.pcap",
            "Station-4-0.pcap",
            "server-0-1.pcap",
            "server-1-2.pcap",
        ] {
            let path = dir.path().join(name);
            assert!(path.exists(), "{name} is missing");
        }

        let station = fs::metadata(dir.path().join("Station-2-0.pcap")).unwrap();
        let idle_station = fs::metadata(dir.path().join("Station-4-0.pcap")).unwrap();
        assert!(station.len() > idle_station.len());
    }

    #[test]
    fn test_stop_time_includes_drain_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), short_run());
        assert_eq!(config.stop_time(), SimTime::from_secs(6));
    }
}
