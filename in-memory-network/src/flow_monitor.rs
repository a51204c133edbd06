//! Per-flow statistics, gathered by probes sitting on the IP layer of every monitored node
//!
//! Packets are classified into flows by their five-tuple. The source node reports a packet when
//! it first sends it, routers when they forward it and the destination when it delivers it to the
//! transport layer. In between, the packet is tracked so its delay can be computed; packets that
//! are neither delivered nor reported as dropped within `max_per_hop_delay` count as lost.

use crate::network::{DropReason, NodeId};
use crate::packet::{IPPROTO_TCP, Packet};
use crate::sim::SimTime;
use crate::stats::PacketStats;
use anyhow::Context;
use serde::Serialize;
use serde_with::{DurationNanoSeconds, serde_as};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

pub type FlowId = u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FiveTuple {
    pub fn of(packet: &Packet) -> Self {
        Self {
            source_address: packet.ip.source,
            destination_address: packet.ip.destination,
            protocol: IPPROTO_TCP,
            source_port: packet.tcp.source_port,
            destination_port: packet.tcp.destination_port,
        }
    }
}

/// Hands out flow ids, starting at 1, in the order flows are first seen
#[derive(Default)]
pub struct Ipv4FlowClassifier {
    flows: HashMap<FiveTuple, FlowId>,
    tuples: BTreeMap<FlowId, FiveTuple>,
}

impl Ipv4FlowClassifier {
    pub fn classify(&mut self, packet: &Packet) -> FlowId {
        let tuple = FiveTuple::of(packet);
        if let Some(id) = self.flows.get(&tuple) {
            return *id;
        }

        let id = self.flows.len() as FlowId + 1;
        self.flows.insert(tuple, id);
        self.tuples.insert(id, tuple);
        id
    }

    pub fn find_flow(&self, id: FlowId) -> Option<FiveTuple> {
        self.tuples.get(&id).copied()
    }

    pub fn flows(&self) -> impl Iterator<Item = (FlowId, FiveTuple)> + '_ {
        self.tuples.iter().map(|(id, tuple)| (*id, *tuple))
    }
}

#[derive(Clone, Debug)]
pub struct FlowMonitorConfig {
    /// Packets not seen anywhere for longer than this are considered lost
    pub max_per_hop_delay: Duration,
    pub delay_bin_width: f64,
    pub jitter_bin_width: f64,
    pub packet_size_bin_width: f64,
    pub flow_interruptions_bin_width: f64,
    /// Gaps between received packets shorter than this do not count as interruptions
    pub flow_interruptions_min_time: Duration,
}

impl Default for FlowMonitorConfig {
    fn default() -> Self {
        Self {
            max_per_hop_delay: Duration::from_secs(10),
            delay_bin_width: 0.001,
            jitter_bin_width: 0.001,
            packet_size_bin_width: 20.0,
            flow_interruptions_bin_width: 0.25,
            flow_interruptions_min_time: Duration::from_millis(500),
        }
    }
}

/// Fixed-width bins, counting values from zero upwards
#[derive(Clone, Debug)]
pub struct Histogram {
    bin_width: f64,
    counts: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub index: usize,
    pub start: f64,
    pub width: f64,
    pub count: u64,
}

impl Histogram {
    pub fn new(bin_width: f64) -> Self {
        Self {
            bin_width,
            counts: Vec::new(),
        }
    }

    pub fn add_value(&mut self, value: f64) {
        let index = (value.max(0.0) / self.bin_width).floor() as usize;
        if index >= self.counts.len() {
            self.counts.resize(index + 1, 0);
        }
        self.counts[index] += 1;
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-empty bins only
    pub fn bins(&self) -> Vec<HistogramBin> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(index, count)| HistogramBin {
                index,
                start: index as f64 * self.bin_width,
                width: self.bin_width,
                count: *count,
            })
            .collect()
    }
}

impl Serialize for Histogram {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Repr {
            n_bins: usize,
            bins: Vec<HistogramBin>,
        }

        Repr {
            n_bins: self.counts.len(),
            bins: self.bins(),
        }
        .serialize(serializer)
    }
}

#[serde_as]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
    pub time_first_tx_packet: Option<SimTime>,
    pub time_first_rx_packet: Option<SimTime>,
    pub time_last_tx_packet: Option<SimTime>,
    pub time_last_rx_packet: Option<SimTime>,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub delay_sum: Duration,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub jitter_sum: Duration,
    #[serde(skip)]
    pub last_delay: Option<Duration>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub times_forwarded: u64,
    pub packets_dropped: BTreeMap<DropReason, PacketStats>,
    #[serde(skip)]
    pub delay_histogram: Histogram,
    #[serde(skip)]
    pub jitter_histogram: Histogram,
    #[serde(skip)]
    pub packet_size_histogram: Histogram,
    #[serde(skip)]
    pub flow_interruptions_histogram: Histogram,
}

impl FlowStats {
    fn new(config: &FlowMonitorConfig) -> Self {
        Self {
            time_first_tx_packet: None,
            time_first_rx_packet: None,
            time_last_tx_packet: None,
            time_last_rx_packet: None,
            delay_sum: Duration::ZERO,
            jitter_sum: Duration::ZERO,
            last_delay: None,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            lost_packets: 0,
            times_forwarded: 0,
            packets_dropped: BTreeMap::new(),
            delay_histogram: Histogram::new(config.delay_bin_width),
            jitter_histogram: Histogram::new(config.jitter_bin_width),
            packet_size_histogram: Histogram::new(config.packet_size_bin_width),
            flow_interruptions_histogram: Histogram::new(config.flow_interruptions_bin_width),
        }
    }

    pub fn mean_delay(&self) -> Option<Duration> {
        (self.rx_packets > 0).then(|| self.delay_sum / self.rx_packets as u32)
    }

    /// Received bits per second between the first transmission and the last reception
    pub fn throughput_bps(&self) -> Option<f64> {
        let duration = self
            .time_last_rx_packet?
            .saturating_duration_since(self.time_first_tx_packet?);
        (!duration.is_zero()).then(|| self.rx_bytes as f64 * 8.0 / duration.as_secs_f64())
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeFlowStats {
    pub packets: u64,
    pub bytes: u64,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub delay_from_first_probe_sum: Duration,
    pub packets_dropped: BTreeMap<DropReason, PacketStats>,
}

/// What the IP layer of one node saw of each flow
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowProbe {
    pub node: NodeId,
    pub flows: BTreeMap<FlowId, ProbeFlowStats>,
}

struct TrackedPacket {
    first_seen: SimTime,
    last_seen: SimTime,
    times_forwarded: u64,
}

pub struct FlowMonitor {
    config: FlowMonitorConfig,
    classifier: Ipv4FlowClassifier,
    flows: BTreeMap<FlowId, FlowStats>,
    tracked: HashMap<(FlowId, u64), TrackedPacket>,
    /// Indexed by node; `None` for nodes without a probe
    probes: Vec<Option<FlowProbe>>,
}

impl FlowMonitor {
    pub fn new(config: FlowMonitorConfig) -> Self {
        Self {
            config,
            classifier: Ipv4FlowClassifier::default(),
            flows: BTreeMap::new(),
            tracked: HashMap::new(),
            probes: Vec::new(),
        }
    }

    pub(crate) fn add_probe(&mut self, node: NodeId) {
        if node >= self.probes.len() {
            self.probes.resize_with(node + 1, || None);
        }

        self.probes[node].get_or_insert_with(|| FlowProbe {
            node,
            flows: BTreeMap::new(),
        });
    }

    pub fn monitors(&self, node: NodeId) -> bool {
        self.probes.get(node).is_some_and(|p| p.is_some())
    }

    pub fn classifier(&self) -> &Ipv4FlowClassifier {
        &self.classifier
    }

    pub fn flow_stats(&self) -> &BTreeMap<FlowId, FlowStats> {
        &self.flows
    }

    pub fn probes(&self) -> impl Iterator<Item = &FlowProbe> {
        self.probes.iter().flatten()
    }

    pub fn tracked_packets(&self) -> usize {
        self.tracked.len()
    }

    pub(crate) fn report_first_tx(&mut self, node: NodeId, packet: &Packet, now: SimTime) {
        if !self.monitors(node) {
            return;
        }

        let flow = self.classifier.classify(packet);
        let size = packet.size() as u64;
        self.tracked.insert(
            (flow, packet.uid),
            TrackedPacket {
                first_seen: now,
                last_seen: now,
                times_forwarded: 0,
            },
        );

        let config = &self.config;
        let stats = self
            .flows
            .entry(flow)
            .or_insert_with(|| FlowStats::new(config));
        if stats.tx_packets == 0 {
            stats.time_first_tx_packet = Some(now);
        }
        stats.tx_packets += 1;
        stats.tx_bytes += size;
        stats.time_last_tx_packet = Some(now);

        self.add_to_probe(node, flow, size, Duration::ZERO);
    }

    pub(crate) fn report_forwarding(&mut self, node: NodeId, packet: &Packet, now: SimTime) {
        if !self.monitors(node) {
            return;
        }

        let flow = self.classifier.classify(packet);
        let Some(tracked) = self.tracked.get_mut(&(flow, packet.uid)) else {
            return;
        };

        tracked.times_forwarded += 1;
        tracked.last_seen = now;
        let delay = now.saturating_duration_since(tracked.first_seen);
        self.add_to_probe(node, flow, packet.size() as u64, delay);
    }

    pub(crate) fn report_last_rx(&mut self, node: NodeId, packet: &Packet, now: SimTime) {
        if !self.monitors(node) {
            return;
        }

        let flow = self.classifier.classify(packet);
        let Some(tracked) = self.tracked.remove(&(flow, packet.uid)) else {
            return;
        };

        let size = packet.size() as u64;
        let delay = now.saturating_duration_since(tracked.first_seen);
        self.add_to_probe(node, flow, size, delay);

        let min_interruption = self.config.flow_interruptions_min_time;
        let config = &self.config;
        let stats = self
            .flows
            .entry(flow)
            .or_insert_with(|| FlowStats::new(config));

        stats.delay_sum += delay;
        stats.delay_histogram.add_value(delay.as_secs_f64());
        if let Some(last_delay) = stats.last_delay {
            let jitter = delay.abs_diff(last_delay);
            stats.jitter_sum += jitter;
            stats.jitter_histogram.add_value(jitter.as_secs_f64());
        }
        stats.last_delay = Some(delay);

        stats.rx_bytes += size;
        stats.packet_size_histogram.add_value(size as f64);
        match stats.time_last_rx_packet {
            None => stats.time_first_rx_packet = Some(now),
            Some(last) => {
                let gap = now.saturating_duration_since(last);
                if gap > min_interruption {
                    stats.flow_interruptions_histogram.add_value(gap.as_secs_f64());
                }
            }
        }
        stats.rx_packets += 1;
        stats.time_last_rx_packet = Some(now);
        stats.times_forwarded += tracked.times_forwarded;
    }

    pub(crate) fn report_drop(&mut self, node: NodeId, packet: &Packet, reason: DropReason) {
        if !self.monitors(node) {
            return;
        }

        let flow = self.classifier.classify(packet);
        if self.tracked.remove(&(flow, packet.uid)).is_none() {
            return;
        }

        let size = packet.size();
        if let Some(stats) = self.flows.get_mut(&flow) {
            stats
                .packets_dropped
                .entry(reason)
                .or_default()
                .track_one(size);
        }

        if let Some(Some(probe)) = self.probes.get_mut(node) {
            probe
                .flows
                .entry(flow)
                .or_default()
                .packets_dropped
                .entry(reason)
                .or_default()
                .track_one(size);
        }
    }

    /// Counts packets that have not been seen anywhere for too long as lost
    pub fn check_for_lost_packets(&mut self, now: SimTime) {
        let max_delay = self.config.max_per_hop_delay;
        let flows = &mut self.flows;
        self.tracked.retain(|(flow, _), tracked| {
            let lost = now.saturating_duration_since(tracked.last_seen) > max_delay;
            if lost {
                if let Some(stats) = flows.get_mut(flow) {
                    stats.lost_packets += 1;
                }
            }
            !lost
        });
    }

    fn add_to_probe(&mut self, node: NodeId, flow: FlowId, bytes: u64, delay: Duration) {
        if let Some(Some(probe)) = self.probes.get_mut(node) {
            let stats = probe.flows.entry(flow).or_default();
            stats.packets += 1;
            stats.bytes += bytes;
            stats.delay_from_first_probe_sum += delay;
        }
    }

    pub fn to_json(&self, histograms: bool, probes: bool) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.report(histograms, probes))
            .context("failed to serialize flow monitor statistics")
    }

    pub fn serialize_to_json_file(
        &self,
        path: &Path,
        histograms: bool,
        probes: bool,
    ) -> anyhow::Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to open {} for writing", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.report(histograms, probes))
            .with_context(|| format!("failed to write flow statistics to {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))
    }

    fn report(&self, histograms: bool, probes: bool) -> FlowMonitorReport<'_> {
        FlowMonitorReport {
            flow_stats: self
                .flows
                .iter()
                .map(|(flow_id, stats)| FlowRecord {
                    flow_id: *flow_id,
                    stats,
                    histograms: histograms.then_some(FlowHistograms {
                        delay_histogram: &stats.delay_histogram,
                        jitter_histogram: &stats.jitter_histogram,
                        packet_size_histogram: &stats.packet_size_histogram,
                        flow_interruptions_histogram: &stats.flow_interruptions_histogram,
                    }),
                })
                .collect(),
            ipv4_flow_classifier: self
                .classifier
                .flows()
                .map(|(flow_id, tuple)| ClassifiedFlow { flow_id, tuple })
                .collect(),
            flow_probes: probes.then(|| self.probes().collect()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowMonitorReport<'a> {
    flow_stats: Vec<FlowRecord<'a>>,
    ipv4_flow_classifier: Vec<ClassifiedFlow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow_probes: Option<Vec<&'a FlowProbe>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowRecord<'a> {
    flow_id: FlowId,
    #[serde(flatten)]
    stats: &'a FlowStats,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    histograms: Option<FlowHistograms<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowHistograms<'a> {
    delay_histogram: &'a Histogram,
    jitter_histogram: &'a Histogram,
    packet_size_histogram: &'a Histogram,
    flow_interruptions_histogram: &'a Histogram,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifiedFlow {
    flow_id: FlowId,
    #[serde(flatten)]
    tuple: FiveTuple,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{Ipv4Header, TcpHeader};

    const SOURCE: NodeId = 2;
    const ROUTER: NodeId = 1;
    const SINK: NodeId = 0;

    fn packet(uid: u64, payload_len: u32) -> Packet {
        Packet {
            uid,
            ip: Ipv4Header {
                source: Ipv4Addr::new(10, 0, 1, 1),
                destination: Ipv4Addr::new(10, 0, 2, 2),
                ttl: 64,
                tos: 0,
                sent_at: SimTime::ZERO,
            },
            tcp: TcpHeader {
                source_port: 49153,
                destination_port: 9,
                ..TcpHeader::default()
            },
            payload_len,
            retransmission: false,
        }
    }

    fn monitor() -> FlowMonitor {
        let mut monitor = FlowMonitor::new(FlowMonitorConfig::default());
        for node in [SINK, ROUTER, SOURCE] {
            monitor.add_probe(node);
        }
        monitor
    }

    #[test]
    fn test_classifier_assigns_ids_per_direction() {
        let mut classifier = Ipv4FlowClassifier::default();
        let forward = packet(1, 100);
        let mut reverse = packet(2, 0);
        std::mem::swap(&mut reverse.ip.source, &mut reverse.ip.destination);
        std::mem::swap(&mut reverse.tcp.source_port, &mut reverse.tcp.destination_port);

        assert_eq!(classifier.classify(&forward), 1);
        assert_eq!(classifier.classify(&reverse), 2);
        assert_eq!(classifier.classify(&packet(3, 100)), 1);

        let tuple = classifier.find_flow(1).unwrap();
        assert_eq!(tuple.destination_port, 9);
        assert_eq!(tuple.protocol, IPPROTO_TCP);
    }

    #[test]
    fn test_delay_jitter_and_forwarding() {
        let mut monitor = monitor();

        // First packet takes 10 ms end to end, the second one 14 ms
        let first = packet(1, 400);
        monitor.report_first_tx(SOURCE, &first, SimTime::from_millis(0));
        monitor.report_forwarding(ROUTER, &first, SimTime::from_millis(4));
        monitor.report_last_rx(SINK, &first, SimTime::from_millis(10));

        let second = packet(2, 400);
        monitor.report_first_tx(SOURCE, &second, SimTime::from_millis(5));
        monitor.report_forwarding(ROUTER, &second, SimTime::from_millis(9));
        monitor.report_last_rx(SINK, &second, SimTime::from_millis(19));

        let stats = &monitor.flow_stats()[&1];
        assert_eq!(stats.tx_packets, 2);
        assert_eq!(stats.rx_packets, 2);
        assert_eq!(stats.tx_bytes, 2 * 440);
        assert_eq!(stats.rx_bytes, 2 * 440);
        assert_eq!(stats.delay_sum, Duration::from_millis(24));
        assert_eq!(stats.jitter_sum, Duration::from_millis(4));
        assert_eq!(stats.times_forwarded, 2);
        assert_eq!(stats.mean_delay(), Some(Duration::from_millis(12)));
        assert_eq!(stats.time_first_tx_packet, Some(SimTime::from_millis(0)));
        assert_eq!(stats.time_last_rx_packet, Some(SimTime::from_millis(19)));
        assert_eq!(stats.delay_histogram.count(), 2);
        assert_eq!(stats.jitter_histogram.count(), 1);
        assert_eq!(monitor.tracked_packets(), 0);

        let router = monitor.probes().find(|p| p.node == ROUTER).unwrap();
        assert_eq!(router.flows[&1].packets, 2);
        assert_eq!(
            router.flows[&1].delay_from_first_probe_sum,
            Duration::from_millis(8)
        );
    }

    #[test]
    fn test_drops_and_losses() {
        let mut monitor = monitor();

        let dropped = packet(1, 400);
        monitor.report_first_tx(SOURCE, &dropped, SimTime::ZERO);
        monitor.report_drop(ROUTER, &dropped, DropReason::QueueDisc);

        let vanished = packet(2, 400);
        monitor.report_first_tx(SOURCE, &vanished, SimTime::ZERO);

        monitor.check_for_lost_packets(SimTime::from_secs(5));
        assert_eq!(monitor.flow_stats()[&1].lost_packets, 0);

        monitor.check_for_lost_packets(SimTime::from_secs(11));
        let stats = &monitor.flow_stats()[&1];
        assert_eq!(stats.lost_packets, 1);
        assert_eq!(stats.packets_dropped[&DropReason::QueueDisc].packets, 1);
        assert_eq!(monitor.tracked_packets(), 0);
    }

    #[test]
    fn test_unmonitored_nodes_report_nothing() {
        let mut monitor = FlowMonitor::new(FlowMonitorConfig::default());
        monitor.add_probe(SINK);
        monitor.report_first_tx(SOURCE, &packet(1, 10), SimTime::ZERO);
        assert!(monitor.flow_stats().is_empty());
        assert!(!monitor.monitors(SOURCE));
    }

    #[test]
    fn test_json_report() {
        let mut monitor = monitor();
        let p = packet(1, 400);
        monitor.report_first_tx(SOURCE, &p, SimTime::ZERO);
        monitor.report_last_rx(SINK, &p, SimTime::from_millis(3));

        let json: serde_json::Value =
            serde_json::from_str(&monitor.to_json(true, true).unwrap()).unwrap();
        let flow = &json["flowStats"][0];
        assert_eq!(flow["flowId"], 1);
        assert_eq!(flow["txBytes"], 440);
        assert_eq!(flow["delaySum"], 3_000_000);
        assert_eq!(flow["delayHistogram"]["bins"][0]["index"], 3);
        assert_eq!(json["ipv4FlowClassifier"][0]["sourceAddress"], "10.0.1.1");
        assert_eq!(json["ipv4FlowClassifier"][0]["destinationPort"], 9);
        assert_eq!(json["flowProbes"].as_array().unwrap().len(), 3);

        let json: serde_json::Value =
            serde_json::from_str(&monitor.to_json(false, false).unwrap()).unwrap();
        assert!(json["flowStats"][0].get("delayHistogram").is_none());
        assert!(json.get("flowProbes").is_none());
    }
}
