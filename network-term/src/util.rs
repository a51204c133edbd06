use crate::config::ScenarioConfig;
use in_memory_network::flow_monitor::{FiveTuple, FlowId, FlowStats};
use in_memory_network::network::Network;

pub fn print_params(config: &ScenarioConfig) {
    println!("--- Params ---");
    println!("* Seed: {}", config.seed);
    println!("* Payload size: {} bytes", config.payload_size);
    println!("* Data rate: {}", config.data_rate);
    println!("* Congestion control: {}", config.congestion_control);
    println!("* Recovery: {}", config.recovery);
    println!("* SACK: {}", config.sack);
    println!("* Wi-Fi data mode: {}", config.phy_rate);
    println!("* Bottleneck bandwidth: {}", config.bandwidth);
    println!("* Bottleneck delay: {:?}", config.delay);
    println!("* Bottleneck queue disc: {}", config.queue_disc);
    println!("* Bottleneck burst error rate: {}", config.error_p);
    println!("* Simulation time: {:?}", config.simulation_time);
    if config.max_bytes == 0 {
        println!("* Byte limit: unlimited");
    } else {
        println!("* Byte limit: {} bytes", config.max_bytes);
    }
    println!("* Output directory: {}", config.output_dir.display());
    println!("* Packet captures: {}", config.pcap);
}

pub fn print_flow_stats(flow_id: FlowId, tuple: &FiveTuple, stats: &FlowStats) {
    println!(
        "* Flow {flow_id} ({}:{} -> {}:{})",
        tuple.source_address, tuple.source_port, tuple.destination_address, tuple.destination_port
    );
    println!(
        "  * Sent: {} packets ({} bytes)",
        stats.tx_packets, stats.tx_bytes
    );
    println!(
        "  * Received: {} packets ({} bytes)",
        stats.rx_packets, stats.rx_bytes
    );
    println!("  * Lost: {} packets", stats.lost_packets);
    for (reason, dropped) in &stats.packets_dropped {
        println!(
            "  * Dropped ({reason}): {} packets ({} bytes)",
            dropped.packets, dropped.bytes
        );
    }
    if let Some(delay) = stats.mean_delay() {
        println!("  * Mean delay: {delay:?}");
    }
    if let Some(throughput) = stats.throughput_bps() {
        println!("  * Throughput: {:.3} Mbps", throughput / 1e6);
    }
}

pub fn print_node_stats(network: &Network) {
    println!("--- Node stats ---");
    for node in network.nodes() {
        let stats = node.stats();
        println!("* {}", node.id());
        println!(
            "  * Sent packets: {} ({} bytes)",
            stats.sent.packets, stats.sent.bytes
        );
        println!(
            "  * Received packets: {} ({} bytes)",
            stats.received.packets, stats.received.bytes
        );
        if stats.forwarded.packets > 0 {
            println!(
                "  * Forwarded packets: {} ({} bytes)",
                stats.forwarded.packets, stats.forwarded.bytes
            );
        }
    }
}

pub fn print_device_stats(network: &Network) {
    println!("--- Device stats ---");
    for device in network.devices() {
        let Some(queue_disc) = device.queue_disc() else {
            continue;
        };

        let node = network
            .node(device.node())
            .map(|n| n.id().to_string())
            .unwrap_or_default();
        let stats = device.stats();
        let dropped = stats.dropped();
        println!(
            "* {node}/{} ({}, {})",
            device.index(),
            device.kind().name(),
            queue_disc.kind()
        );
        println!(
            "|-> Transmitted {} packets ({} bytes)",
            stats.transmitted.packets, stats.transmitted.bytes
        );
        println!(
            "|-> Dropped {} packets ({} bytes)",
            dropped.packets, dropped.bytes
        );

        let queue_stats = queue_disc.stats();
        println!(
            "|-> Queue disc dropped {} packets on enqueue and {} on dequeue (max {} queued)",
            queue_stats.dropped_before_enqueue.packets,
            queue_stats.dropped_after_dequeue.packets,
            queue_stats.max_len
        );
    }
}
