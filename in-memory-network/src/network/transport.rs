//! The glue between the IP layer and TCP sockets

use crate::network::event::NetworkEvent;
use crate::network::{AppId, DropReason, Network, NodeId, SocketId};
use crate::packet::Packet;
use crate::sim::SimTime;
use crate::tcp::socket::{TcpOutput, TcpSocket};
use anyhow::{Context, bail};
use std::net::SocketAddrV4;

pub(crate) struct SocketEntry {
    pub(crate) socket: TcpSocket,
    pub(crate) node: NodeId,
    /// The application notified of the socket's events
    pub(crate) app: Option<AppId>,
}

impl Network {
    pub fn socket(&self, id: SocketId) -> Option<&TcpSocket> {
        self.sockets.get(id).map(|e| &e.socket)
    }

    /// Every socket ever opened, together with its node
    pub fn sockets(&self) -> impl Iterator<Item = (SocketId, NodeId, &TcpSocket)> {
        self.sockets
            .iter()
            .enumerate()
            .map(|(id, e)| (id, e.node, &e.socket))
    }

    fn register_socket(&mut self, node: NodeId, app: Option<AppId>, socket: TcpSocket) -> SocketId {
        let id = self.sockets.len();
        self.connections
            .insert((socket.local(), socket.remote()), id);
        self.sockets.push(SocketEntry { socket, node, app });
        id
    }

    /// Hands a packet delivered to the node to the socket it belongs to
    pub(crate) fn tcp_receive(&mut self, node: NodeId, packet: Packet) {
        let now = self.now();
        let local = packet.destination();
        let remote = packet.source();

        if let Some(&id) = self.connections.get(&(local, remote)) {
            let mut outputs = Vec::new();
            self.sockets[id]
                .socket
                .receive(&packet.tcp, packet.payload_len, now, &mut outputs);
            self.apply_tcp_outputs(id, outputs);
            return;
        }

        let flags = packet.tcp.flags;
        if flags.syn && !flags.ack {
            if let Some(&app) = self.listeners.get(&(node, local.port())) {
                let mut outputs = Vec::new();
                let socket = TcpSocket::accept(
                    &self.config().tcp,
                    local,
                    remote,
                    &packet.tcp,
                    now,
                    &mut outputs,
                );
                let id = self.register_socket(node, Some(app), socket);
                tracing::debug!(node, "accepted connection from {remote} on port {}", local.port());
                self.apply_tcp_outputs(id, outputs);
                return;
            }
        }

        self.drop_packet(node, None, packet, DropReason::NoSocket);
    }

    pub(crate) fn apply_tcp_outputs(&mut self, id: SocketId, outputs: Vec<TcpOutput>) {
        let now = self.now();
        for output in outputs {
            let entry = &self.sockets[id];
            match output {
                TcpOutput::Segment(segment) => {
                    let node = entry.node;
                    let (local, remote) = (entry.socket.local(), entry.socket.remote());
                    let packet = self.new_packet(local, remote, segment);
                    self.send_from_node(node, packet);
                }
                TcpOutput::Timer {
                    kind,
                    at,
                    generation,
                } => self.schedule_at(
                    at,
                    NetworkEvent::TcpTimer {
                        socket: id,
                        kind,
                        generation,
                    },
                ),
                TcpOutput::Notify(notification) => {
                    if let Some(app) = entry.app {
                        self.schedule_at(
                            now,
                            NetworkEvent::AppNotify {
                                app,
                                socket: id,
                                notification,
                            },
                        );
                    }
                }
            }
        }
    }
}

/// What an application can do while one of its handlers runs
pub struct AppContext<'a> {
    pub(crate) network: &'a mut Network,
    pub(crate) app: AppId,
    pub(crate) node: NodeId,
}

impl AppContext<'_> {
    pub fn now(&self) -> SimTime {
        self.network.now()
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Opens a connection towards `remote`, from the address of the outgoing device
    pub fn connect(&mut self, remote: SocketAddrV4) -> anyhow::Result<SocketId> {
        let network = &mut *self.network;
        if !network.routes_populated() {
            bail!("routing tables must be populated before opening sockets");
        }

        let node = &network.nodes[self.node];
        let local_ip = if node.owns_address(*remote.ip()) {
            *remote.ip()
        } else {
            let (device, _) = node
                .routing_table()
                .lookup(*remote.ip())
                .with_context(|| format!("no route towards {remote}"))?;
            network.devices[device]
                .address()
                .with_context(|| format!("device {device} has no address"))?
                .address()
        };

        let port = network.nodes[self.node].allocate_port();
        let local = SocketAddrV4::new(local_ip, port);
        let now = network.now();
        let mut outputs = Vec::new();
        let socket = TcpSocket::connect(&network.config().tcp, local, remote, now, &mut outputs);
        let id = network.register_socket(self.node, Some(self.app), socket);
        tracing::debug!(node = self.node, "connecting {local} to {remote}");
        network.apply_tcp_outputs(id, outputs);
        Ok(id)
    }

    /// Accepts incoming connections on the port, on any of the node's addresses
    pub fn listen(&mut self, port: u16) -> anyhow::Result<()> {
        let key = (self.node, port);
        if self.network.listeners.contains_key(&key) {
            bail!("port {port} is already in use");
        }

        self.network.listeners.insert(key, self.app);
        Ok(())
    }

    /// Free room in the socket's send buffer
    pub fn tx_available(&self, socket: SocketId) -> u32 {
        self.network
            .socket(socket)
            .map(|s| s.tx_available())
            .unwrap_or(0)
    }

    pub fn send(&mut self, socket: SocketId, bytes: u32) -> u32 {
        let now = self.network.now();
        let mut outputs = Vec::new();
        let Some(entry) = self.network.sockets.get_mut(socket) else {
            return 0;
        };

        let accepted = entry.socket.send(bytes, now, &mut outputs);
        self.network.apply_tcp_outputs(socket, outputs);
        accepted
    }

    pub fn close(&mut self, socket: SocketId) {
        let now = self.network.now();
        let mut outputs = Vec::new();
        let Some(entry) = self.network.sockets.get_mut(socket) else {
            return;
        };

        entry.socket.close(now, &mut outputs);
        self.network.apply_tcp_outputs(socket, outputs);
    }
}
