//! A simulated IPv4 network of nodes, devices and channels
//!
//! The network owns every piece of simulated state and a single event timeline. Building it
//! follows the usual order: create nodes, connect them with point-to-point links and Wi-Fi cells,
//! install internet stacks, assign addresses, populate routing tables and finally install
//! applications. [`Network::run_until`] then processes events until the stop time.

pub mod device;
pub(crate) mod event;
pub mod ip;
pub mod link;
pub mod mobility;
pub mod node;
pub mod route;
pub mod spec;
pub mod transport;
pub mod wifi;

use crate::applications::{Application, BulkSend, BulkSendConfig, PacketSink};
use crate::error_model::{ErrorModel, RandomStream};
use crate::flow_monitor::{FlowMonitor, FlowMonitorConfig};
use crate::network::device::{Device, DeviceKind};
use crate::network::event::NetworkEvent;
use crate::network::ip::{AddressAllocator, Ipv4Cidr};
use crate::network::link::{PointToPointChannel, PointToPointDevice};
use crate::network::mobility::ConstantPositionModel;
use crate::network::node::{Interface, Node};
use crate::network::route::{Attachment, compute_routing_tables};
use crate::network::spec::{PointToPointSpec, WifiRole, WifiSpec};
use crate::network::transport::{AppContext, SocketEntry};
use crate::network::wifi::{WifiAction, WifiChannel, WifiDropReason};
use crate::packet::{Ipv4Header, Packet};
use crate::pcap_exporter::PcapExporterFactory;
use crate::queue_disc::{QueueDiscError, QueueDiscKind, QueueItem};
use crate::sim::{Scheduler, SimTime};
use crate::tcp::TcpConfig;
use crate::tcp::socket::OutgoingSegment;
use anyhow::{Context, bail};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

pub type NodeId = usize;
pub type DeviceId = usize;
pub type ChannelId = usize;
pub type SocketId = usize;
pub type AppId = usize;

/// Random streams of Wi-Fi cells start here, one per channel id
pub const WIFI_STREAM_BASE: u64 = 200;

const DEFAULT_TTL: u8 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DropReason {
    NoRoute,
    TtlExpired,
    NoSocket,
    QueueDisc,
    Corrupted,
    WifiRetryLimit,
    WifiUnreachable,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DropReason::NoRoute => "no route",
            DropReason::TtlExpired => "TTL expired",
            DropReason::NoSocket => "no socket",
            DropReason::QueueDisc => "queue disc",
            DropReason::Corrupted => "corrupted",
            DropReason::WifiRetryLimit => "Wi-Fi retry limit",
            DropReason::WifiUnreachable => "Wi-Fi next hop unreachable",
        };
        f.write_str(name)
    }
}

pub enum Channel {
    PointToPoint(PointToPointChannel),
    Wifi(WifiChannel),
}

#[derive(Clone, Debug, Default)]
pub struct NetworkConfig {
    /// Seeds every random stream in the network
    pub seed: u64,
    pub tcp: TcpConfig,
}

pub(crate) struct InstalledApp {
    node: NodeId,
    /// `None` while the application is running one of its handlers
    app: Option<Application>,
}

pub struct Network {
    config: NetworkConfig,
    scheduler: Scheduler<NetworkEvent>,
    nodes: Vec<Node>,
    devices: Vec<Device>,
    channels: Vec<Channel>,
    pub(crate) sockets: Vec<SocketEntry>,
    pub(crate) connections: HashMap<(SocketAddrV4, SocketAddrV4), SocketId>,
    pub(crate) listeners: HashMap<(NodeId, u16), AppId>,
    applications: Vec<InstalledApp>,
    flow_monitor: Option<FlowMonitor>,
    routes_populated: bool,
    next_packet_uid: u64,
}

impl Network {
    pub fn new(config: NetworkConfig) -> anyhow::Result<Self> {
        config.tcp.validate().context("invalid TCP configuration")?;
        Ok(Self {
            config,
            scheduler: Scheduler::new(),
            nodes: Vec::new(),
            devices: Vec::new(),
            channels: Vec::new(),
            sockets: Vec::new(),
            connections: HashMap::new(),
            listeners: HashMap::new(),
            applications: Vec::new(),
            flow_monitor: None,
            routes_populated: false,
            next_packet_uid: 0,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn create_node(&mut self, id: impl Into<Arc<str>>) -> NodeId {
        self.nodes.push(Node::new(id.into()));
        self.nodes.len() - 1
    }

    pub fn install_mobility(
        &mut self,
        node: NodeId,
        model: ConstantPositionModel,
    ) -> anyhow::Result<()> {
        let n = self
            .nodes
            .get_mut(node)
            .with_context(|| format!("node {node} does not exist"))?;
        n.mobility = Some(model);

        for &device in &n.devices {
            if let DeviceKind::Wifi { channel, .. } = self.devices[device].kind {
                if let Some(Channel::Wifi(wifi)) = self.channels.get_mut(channel) {
                    wifi.set_position(device, model.position());
                }
            }
        }

        Ok(())
    }

    pub fn add_wifi_channel(&mut self, spec: WifiSpec) -> anyhow::Result<ChannelId> {
        spec.validate()?;
        let id = self.channels.len();
        let random = RandomStream::new(self.config.seed, WIFI_STREAM_BASE + id as u64);
        self.channels
            .push(Channel::Wifi(WifiChannel::new(spec, random)));
        Ok(id)
    }

    pub fn install_wifi_device(
        &mut self,
        node: NodeId,
        channel: ChannelId,
        role: WifiRole,
    ) -> anyhow::Result<DeviceId> {
        self.check_node(node)?;
        let position = self.nodes[node].mobility.map(|m| m.position());
        let Some(Channel::Wifi(wifi)) = self.channels.get_mut(channel) else {
            bail!("channel {channel} is not a Wi-Fi channel");
        };

        if role == WifiRole::AccessPoint
            && wifi
                .devices()
                .any(|d| wifi.role_of(d) == Some(&WifiRole::AccessPoint))
        {
            bail!("the Wi-Fi cell on channel {channel} already has an access point");
        }

        let device = self.devices.len();
        wifi.attach(device, role.clone());
        if let Some(position) = position {
            wifi.set_position(device, position);
        }

        self.add_device(node, DeviceKind::Wifi { channel, role });
        Ok(device)
    }

    /// Gives the node an IP layer, with a loopback device at 127.0.0.1
    pub fn install_internet_stack(&mut self, node: NodeId) -> anyhow::Result<()> {
        self.check_node(node)?;
        if self.nodes[node].internet_stack {
            bail!(
                "node {} already has an internet stack",
                self.nodes[node].id
            );
        }

        let device = self.add_device(node, DeviceKind::Loopback);
        let address = Ipv4Cidr::new(Ipv4Addr::LOCALHOST, 8)?;
        self.devices[device].address = Some(address);
        let n = &mut self.nodes[node];
        n.interfaces.push(Interface { device, address });
        n.internet_stack = true;
        Ok(())
    }

    pub fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        spec: &PointToPointSpec,
    ) -> anyhow::Result<[DeviceId; 2]> {
        self.check_node(a)?;
        self.check_node(b)?;
        if a == b {
            bail!("a point-to-point link needs two different nodes");
        }

        let channel = self.channels.len();
        let device_a = self.devices.len();
        let device_b = device_a + 1;
        self.add_device(
            a,
            DeviceKind::PointToPoint(PointToPointDevice::new(channel, device_b, spec)),
        );
        self.add_device(
            b,
            DeviceKind::PointToPoint(PointToPointDevice::new(channel, device_a, spec)),
        );
        self.channels.push(Channel::PointToPoint(PointToPointChannel::new(
            [device_a, device_b],
            spec,
        )));

        Ok([device_a, device_b])
    }

    /// Makes the device drop incoming packets the model marks as corrupt
    pub fn set_receive_error_model(
        &mut self,
        device: DeviceId,
        model: Box<dyn ErrorModel>,
    ) -> anyhow::Result<()> {
        let d = self
            .devices
            .get_mut(device)
            .with_context(|| format!("device {device} does not exist"))?;
        d.receive_error_model = Some(model);
        Ok(())
    }

    pub fn install_queue_disc(
        &mut self,
        device: DeviceId,
        kind: QueueDiscKind,
    ) -> Result<(), QueueDiscError> {
        let d = self
            .devices
            .get_mut(device)
            .filter(|d| !matches!(d.kind, DeviceKind::Loopback))
            .ok_or(QueueDiscError::NoSuchDevice { device })?;

        if let Some(existing) = d.queue_disc_kind() {
            return Err(QueueDiscError::AlreadyInstalled { device, existing });
        }

        d.queue_disc = Some(kind.build());
        Ok(())
    }

    /// Assigns the next addresses of the allocator's current network to the devices, in order
    ///
    /// Devices without a queue disc get the default one.
    pub fn assign_addresses(
        &mut self,
        devices: &[DeviceId],
        allocator: &mut AddressAllocator,
    ) -> anyhow::Result<Vec<Ipv4Cidr>> {
        if self.routes_populated {
            tracing::warn!("addresses assigned after routing tables were populated");
        }

        let mut assigned = Vec::with_capacity(devices.len());
        for &device in devices {
            let d = self
                .devices
                .get(device)
                .with_context(|| format!("device {device} does not exist"))?;
            if matches!(d.kind, DeviceKind::Loopback) {
                bail!("device {device} is a loopback device");
            }
            if let Some(address) = d.address {
                bail!("device {device} already has address {address}");
            }
            if !self.nodes[d.node].internet_stack {
                bail!(
                    "node {} needs an internet stack before it gets addresses",
                    self.nodes[d.node].id
                );
            }

            let address = allocator.allocate()?;
            let d = &mut self.devices[device];
            d.address = Some(address);
            d.queue_disc
                .get_or_insert_with(|| QueueDiscKind::PfifoFast.build());
            if let DeviceKind::Wifi { channel, .. } = d.kind {
                if let Some(Channel::Wifi(wifi)) = self.channels.get_mut(channel) {
                    wifi.set_address(device, address.address());
                }
            }

            self.nodes[d.node]
                .interfaces
                .push(Interface { device, address });
            assigned.push(address);
        }

        Ok(assigned)
    }

    /// Computes the routes of every node, using hop count as the metric
    pub fn populate_routing_tables(&mut self) {
        let attachments: Vec<_> = self
            .devices
            .iter()
            .filter_map(|d| {
                Some(Attachment {
                    node: d.node,
                    device: d.id,
                    channel: d.channel()?,
                    address: d.address?,
                })
            })
            .collect();

        let tables = compute_routing_tables(self.nodes.len(), &attachments);
        for (node, table) in self.nodes.iter_mut().zip(tables) {
            tracing::debug!(
                node = %node.id,
                "{} routes installed",
                table.routes().len()
            );
            node.routing_table = table;
        }

        self.routes_populated = true;
    }

    pub fn install_packet_sink(
        &mut self,
        node: NodeId,
        port: u16,
        start: SimTime,
    ) -> anyhow::Result<AppId> {
        self.install_application(node, Application::PacketSink(PacketSink::new(port)), start)
    }

    pub fn install_bulk_send(
        &mut self,
        node: NodeId,
        config: BulkSendConfig,
        start: SimTime,
    ) -> anyhow::Result<AppId> {
        if config.send_size == 0 {
            bail!("the bulk send chunk size must be positive");
        }

        self.install_application(node, Application::BulkSend(BulkSend::new(config)), start)
    }

    fn install_application(
        &mut self,
        node: NodeId,
        app: Application,
        start: SimTime,
    ) -> anyhow::Result<AppId> {
        self.check_node(node)?;
        if !self.routes_populated {
            bail!(
                "routing tables must be populated before installing {} on node {}",
                app.name(),
                self.nodes[node].id
            );
        }
        if !self.nodes[node].internet_stack {
            bail!("node {} has no internet stack", self.nodes[node].id);
        }

        let id = self.applications.len();
        self.applications.push(InstalledApp {
            node,
            app: Some(app),
        });
        self.scheduler
            .schedule_at(start, NetworkEvent::AppStart { app: id });
        Ok(id)
    }

    /// Captures the traffic of the devices, one capture called `{prefix}-{node}-{device}` each
    pub fn enable_pcap(
        &mut self,
        prefix: &str,
        devices: &[DeviceId],
        factory: &dyn PcapExporterFactory,
    ) -> anyhow::Result<()> {
        for &device in devices {
            let d = self
                .devices
                .get_mut(device)
                .with_context(|| format!("device {device} does not exist"))?;
            let name = format!("{prefix}-{}-{}", d.node, d.index);
            d.pcap = Some(factory.create_pcap_exporter(&name)?);
        }

        Ok(())
    }

    /// Starts gathering flow statistics on every node with an internet stack
    pub fn install_flow_monitor(&mut self, config: FlowMonitorConfig) {
        let mut monitor = FlowMonitor::new(config);
        for (id, node) in self.nodes.iter().enumerate() {
            if node.internet_stack {
                monitor.add_probe(id);
            }
        }

        self.flow_monitor = Some(monitor);
    }

    /// Processes every event scheduled up to and including `stop`
    pub fn run_until(&mut self, stop: SimTime) {
        tracing::info!("running simulation until {stop}");
        while let Some(event) = self.scheduler.next_before(stop) {
            self.handle(event);
        }
        self.scheduler.advance_to(stop);

        if let Some(monitor) = &mut self.flow_monitor {
            monitor.check_for_lost_packets(stop);
        }

        tracing::info!(
            events = self.scheduler.processed_events(),
            pending = self.scheduler.pending_events(),
            "simulation stopped at {}",
            self.now()
        );
    }

    /// Tears the network down, flushing every packet capture
    pub fn destroy(self) -> anyhow::Result<()> {
        for device in &self.devices {
            if let Some(pcap) = &device.pcap {
                pcap.flush().with_context(|| {
                    format!("failed to flush the capture of device {}", device.id)
                })?;
            }
        }

        Ok(())
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn processed_events(&self) -> u64 {
        self.scheduler.processed_events()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn wifi_channel(&self, id: ChannelId) -> Option<&WifiChannel> {
        match self.channels.get(id)? {
            Channel::Wifi(wifi) => Some(wifi),
            Channel::PointToPoint(_) => None,
        }
    }

    pub fn queue_disc_kind(&self, device: DeviceId) -> Option<QueueDiscKind> {
        self.devices.get(device)?.queue_disc_kind()
    }

    pub fn flow_monitor(&self) -> Option<&FlowMonitor> {
        self.flow_monitor.as_ref()
    }

    pub fn application(&self, id: AppId) -> Option<&Application> {
        self.applications.get(id)?.app.as_ref()
    }

    pub fn routes_populated(&self) -> bool {
        self.routes_populated
    }

    fn check_node(&self, node: NodeId) -> anyhow::Result<()> {
        if node >= self.nodes.len() {
            bail!("node {node} does not exist");
        }
        Ok(())
    }

    fn add_device(&mut self, node: NodeId, kind: DeviceKind) -> DeviceId {
        let id = self.devices.len();
        let n = &mut self.nodes[node];
        let index = n.devices.len();
        n.devices.push(id);
        self.devices.push(Device::new(id, node, index, kind));
        id
    }

    fn wifi_channel_mut(&mut self, id: ChannelId) -> Option<&mut WifiChannel> {
        match self.channels.get_mut(id)? {
            Channel::Wifi(wifi) => Some(wifi),
            Channel::PointToPoint(_) => None,
        }
    }

    pub(crate) fn next_packet_uid(&mut self) -> u64 {
        let uid = self.next_packet_uid;
        self.next_packet_uid += 1;
        uid
    }

    pub(crate) fn schedule_at(&mut self, at: SimTime, event: NetworkEvent) {
        self.scheduler.schedule_at(at, event);
    }

    fn handle(&mut self, event: NetworkEvent) {
        let now = self.now();
        match event {
            NetworkEvent::TransmitComplete { device } => {
                if let DeviceKind::PointToPoint(p2p) = &mut self.devices[device].kind {
                    p2p.transmit_complete();
                }
                self.device_try_transmit(device);
            }
            NetworkEvent::Receive { device, packet } => self.device_receive(device, packet),
            NetworkEvent::LoopbackDeliver { node, packet } => self.local_deliver(node, packet),
            NetworkEvent::WifiAccess {
                channel,
                generation,
            } => {
                let mut actions = Vec::new();
                if let Some(wifi) = self.wifi_channel_mut(channel) {
                    wifi.on_access(generation, now, &mut actions);
                }
                self.apply_wifi_actions(channel, actions);
            }
            NetworkEvent::WifiExchangeEnd { channel } => {
                let mut actions = Vec::new();
                if let Some(wifi) = self.wifi_channel_mut(channel) {
                    wifi.on_exchange_end(now, &mut actions);
                }
                self.apply_wifi_actions(channel, actions);
            }
            NetworkEvent::TcpTimer {
                socket,
                kind,
                generation,
            } => {
                let mut outputs = Vec::new();
                if let Some(entry) = self.sockets.get_mut(socket) {
                    entry.socket.on_timer(kind, generation, now, &mut outputs);
                }
                self.apply_tcp_outputs(socket, outputs);
            }
            NetworkEvent::AppStart { app } => {
                self.with_app(app, |app, cx| app.start(cx));
            }
            NetworkEvent::AppNotify {
                app,
                socket,
                notification,
            } => {
                self.with_app(app, |app, cx| app.on_notification(cx, socket, notification));
            }
        }
    }

    fn with_app(&mut self, id: AppId, f: impl FnOnce(&mut Application, &mut AppContext<'_>)) {
        let Some(installed) = self.applications.get_mut(id) else {
            return;
        };
        let node = installed.node;
        let Some(mut app) = installed.app.take() else {
            return;
        };

        let mut cx = AppContext {
            network: self,
            app: id,
            node,
        };
        f(&mut app, &mut cx);
        self.applications[id].app = Some(app);
    }

    /// Hands a packet from a node's IP layer to one of its devices
    fn device_enqueue(&mut self, device: DeviceId, packet: Packet, next_hop: Ipv4Addr) {
        let now = self.now();
        let d = &mut self.devices[device];
        let node = d.node;
        let queue_disc = d
            .queue_disc
            .get_or_insert_with(|| QueueDiscKind::PfifoFast.build());

        let item = QueueItem {
            packet,
            next_hop,
            enqueued_at: now,
        };
        if let Err(rejected) = queue_disc.enqueue(item) {
            self.drop_packet(node, Some(device), rejected.packet, DropReason::QueueDisc);
            return;
        }

        self.device_try_transmit(device);
    }

    /// Moves the next queued packet to the transmit path, if the device can take it
    fn device_try_transmit(&mut self, device: DeviceId) {
        let now = self.now();
        let wifi_channel = match &self.devices[device].kind {
            DeviceKind::Loopback => return,
            DeviceKind::PointToPoint(p2p) if p2p.is_transmitting() => return,
            DeviceKind::PointToPoint(_) => None,
            DeviceKind::Wifi { channel, .. } => {
                if self
                    .wifi_channel(*channel)
                    .is_none_or(|wifi| wifi.has_frame(device))
                {
                    return;
                }
                Some(*channel)
            }
        };

        let Some(item) = self.dequeue(device) else {
            return;
        };

        match wifi_channel {
            Some(channel) => {
                let mut actions = Vec::new();
                if let Some(wifi) = self.wifi_channel_mut(channel) {
                    wifi.offer_frame(device, item, now, &mut actions);
                }
                self.apply_wifi_actions(channel, actions);
            }
            None => {
                let DeviceKind::PointToPoint(p2p) = &mut self.devices[device].kind else {
                    return;
                };
                let peer = p2p.peer();
                let transmission = p2p.start_transmission(item.packet.size(), now);
                self.track_transmit(device, &item.packet);
                self.scheduler.schedule_at(
                    transmission.complete_at,
                    NetworkEvent::TransmitComplete { device },
                );
                self.scheduler.schedule_at(
                    transmission.arrives_at,
                    NetworkEvent::Receive {
                        device: peer,
                        packet: item.packet,
                    },
                );
            }
        }
    }

    fn dequeue(&mut self, device: DeviceId) -> Option<QueueItem> {
        let now = self.now();
        let mut dropped = Vec::new();
        let d = &mut self.devices[device];
        let node = d.node;
        let item = d.queue_disc.as_mut()?.dequeue(now, &mut dropped);
        for item in dropped {
            self.drop_packet(node, Some(device), item.packet, DropReason::QueueDisc);
        }
        item
    }

    fn device_receive(&mut self, device: DeviceId, packet: Packet) {
        let d = &mut self.devices[device];
        let node = d.node;
        if let Some(model) = &mut d.receive_error_model {
            if model.is_corrupt(&packet) {
                self.drop_packet(node, Some(device), packet, DropReason::Corrupted);
                return;
            }
        }

        d.stats.received.track_one(packet.size());
        self.capture(device, &packet);
        self.ip_receive(node, packet);
    }

    fn ip_receive(&mut self, node: NodeId, mut packet: Packet) {
        if self.nodes[node].owns_address(packet.ip.destination) {
            self.local_deliver(node, packet);
            return;
        }

        if packet.ip.ttl <= 1 {
            self.drop_packet(node, None, packet, DropReason::TtlExpired);
            return;
        }
        packet.ip.ttl -= 1;

        let Some((device, next_hop)) = self.nodes[node]
            .routing_table
            .lookup(packet.ip.destination)
        else {
            self.drop_packet(node, None, packet, DropReason::NoRoute);
            return;
        };

        let now = self.now();
        self.nodes[node].stats.forwarded.track_one(packet.size());
        if let Some(monitor) = &mut self.flow_monitor {
            monitor.report_forwarding(node, &packet, now);
        }
        self.device_enqueue(device, packet, next_hop);
    }

    fn local_deliver(&mut self, node: NodeId, packet: Packet) {
        let now = self.now();
        self.nodes[node].stats.received.track_one(packet.size());
        if let Some(monitor) = &mut self.flow_monitor {
            monitor.report_last_rx(node, &packet, now);
        }
        self.tcp_receive(node, packet);
    }

    /// Sends a packet originated by the node's own transport layer
    pub(crate) fn send_from_node(&mut self, node: NodeId, packet: Packet) {
        let now = self.now();
        self.nodes[node].stats.sent.track_one(packet.size());

        if self.nodes[node].owns_address(packet.ip.destination) {
            if let Some(monitor) = &mut self.flow_monitor {
                monitor.report_first_tx(node, &packet, now);
            }
            self.scheduler
                .schedule_at(now, NetworkEvent::LoopbackDeliver { node, packet });
            return;
        }

        let Some((device, next_hop)) = self.nodes[node]
            .routing_table
            .lookup(packet.ip.destination)
        else {
            self.drop_packet(node, None, packet, DropReason::NoRoute);
            return;
        };

        if let Some(monitor) = &mut self.flow_monitor {
            monitor.report_first_tx(node, &packet, now);
        }
        self.device_enqueue(device, packet, next_hop);
    }

    pub(crate) fn new_packet(
        &mut self,
        source: SocketAddrV4,
        destination: SocketAddrV4,
        segment: OutgoingSegment,
    ) -> Packet {
        let now = self.now();
        let mut tcp = segment.header;
        tcp.source_port = source.port();
        tcp.destination_port = destination.port();

        Packet {
            uid: self.next_packet_uid(),
            ip: Ipv4Header {
                source: *source.ip(),
                destination: *destination.ip(),
                ttl: DEFAULT_TTL,
                tos: 0,
                sent_at: now,
            },
            tcp,
            payload_len: segment.payload_len,
            retransmission: segment.retransmission,
        }
    }

    fn apply_wifi_actions(&mut self, channel: ChannelId, actions: Vec<WifiAction>) {
        for action in actions {
            match action {
                WifiAction::ScheduleAccess { at, generation } => self.scheduler.schedule_at(
                    at,
                    NetworkEvent::WifiAccess {
                        channel,
                        generation,
                    },
                ),
                WifiAction::ScheduleExchangeEnd { at } => self
                    .scheduler
                    .schedule_at(at, NetworkEvent::WifiExchangeEnd { channel }),
                WifiAction::Transmitted { device, packet } => self.track_transmit(device, &packet),
                WifiAction::Deliver { to, packet, at } => self
                    .scheduler
                    .schedule_at(at, NetworkEvent::Receive { device: to, packet }),
                WifiAction::AttemptFailed { device } => {
                    self.devices[device].stats.failed_attempts += 1;
                }
                WifiAction::Dropped {
                    device,
                    item,
                    reason,
                } => {
                    let reason = match reason {
                        WifiDropReason::RetryLimit => DropReason::WifiRetryLimit,
                        WifiDropReason::Unreachable => DropReason::WifiUnreachable,
                    };
                    let node = self.devices[device].node;
                    self.drop_packet(node, Some(device), item.packet, reason);
                }
                WifiAction::ReadyForFrame { device } => self.device_try_transmit(device),
            }
        }
    }

    fn track_transmit(&mut self, device: DeviceId, packet: &Packet) {
        self.devices[device]
            .stats
            .transmitted
            .track_one(packet.size());
        self.capture(device, packet);
    }

    fn capture(&mut self, device: DeviceId, packet: &Packet) {
        let now = self.now();
        let d = &mut self.devices[device];
        let Some(pcap) = &mut d.pcap else {
            return;
        };

        if let Err(e) = pcap.track_packet(now, packet) {
            tracing::warn!(
                node = d.node,
                "packet capture of device {} stopped: {e:#}",
                d.index
            );
            d.pcap = None;
        }
    }

    /// Accounts for a packet that will never reach its destination
    ///
    /// `device` is `None` for drops decided by the node's IP or transport layer.
    pub(crate) fn drop_packet(
        &mut self,
        node: NodeId,
        device: Option<DeviceId>,
        packet: Packet,
        reason: DropReason,
    ) {
        let size = packet.size();
        match device {
            Some(device) => {
                let d = &mut self.devices[device];
                let stats = &mut d.stats;
                match reason {
                    DropReason::QueueDisc => stats.dropped_queue_disc.track_one(size),
                    DropReason::Corrupted => stats.dropped_corrupted.track_one(size),
                    DropReason::WifiRetryLimit => stats.dropped_retry_limit.track_one(size),
                    _ => stats.dropped_unreachable.track_one(size),
                }

                if !d.warned_about_drops {
                    d.warned_about_drops = true;
                    tracing::warn!(
                        node = %self.nodes[node].id,
                        "device {} started dropping packets ({reason})",
                        d.index
                    );
                }
            }
            None => {
                let stats = &mut self.nodes[node].stats;
                match reason {
                    DropReason::NoRoute => stats.dropped_no_route.track_one(size),
                    DropReason::TtlExpired => stats.dropped_ttl_expired.track_one(size),
                    _ => stats.dropped_no_socket.track_one(size),
                }
            }
        }

        tracing::debug!(
            node = %self.nodes[node].id,
            uid = packet.uid,
            "packet dropped: {reason}"
        );
        if let Some(monitor) = &mut self.flow_monitor {
            monitor.report_drop(node, &packet, reason);
        }
    }
}
