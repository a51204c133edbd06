//! Traffic sources and sinks running on top of TCP sockets

use crate::network::SocketId;
use crate::network::transport::AppContext;
use crate::sim::SimTime;
use crate::tcp::socket::SocketNotification;
use std::net::SocketAddrV4;

pub enum Application {
    BulkSend(BulkSend),
    PacketSink(PacketSink),
}

impl Application {
    pub fn name(&self) -> &'static str {
        match self {
            Application::BulkSend(_) => "BulkSend",
            Application::PacketSink(_) => "PacketSink",
        }
    }

    pub fn as_bulk_send(&self) -> Option<&BulkSend> {
        match self {
            Application::BulkSend(app) => Some(app),
            Application::PacketSink(_) => None,
        }
    }

    pub fn as_packet_sink(&self) -> Option<&PacketSink> {
        match self {
            Application::PacketSink(app) => Some(app),
            Application::BulkSend(_) => None,
        }
    }

    pub(crate) fn start(&mut self, cx: &mut AppContext<'_>) {
        match self {
            Application::BulkSend(app) => app.start(cx),
            Application::PacketSink(app) => app.start(cx),
        }
    }

    pub(crate) fn on_notification(
        &mut self,
        cx: &mut AppContext<'_>,
        socket: SocketId,
        notification: SocketNotification,
    ) {
        match self {
            Application::BulkSend(app) => app.on_notification(cx, socket, notification),
            Application::PacketSink(app) => app.on_notification(cx, socket, notification),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BulkSendConfig {
    pub remote: SocketAddrV4,
    /// Bytes handed to the socket per write
    pub send_size: u32,
    /// Total bytes to send before closing the connection; 0 means no limit
    pub max_bytes: u64,
}

/// Keeps the send buffer of a single connection as full as possible
pub struct BulkSend {
    config: BulkSendConfig,
    socket: Option<SocketId>,
    connected: bool,
    closed: bool,
    total_sent: u64,
}

impl BulkSend {
    pub fn new(config: BulkSendConfig) -> Self {
        Self {
            config,
            socket: None,
            connected: false,
            closed: false,
            total_sent: 0,
        }
    }

    pub fn config(&self) -> &BulkSendConfig {
        &self.config
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// Bytes accepted by the socket so far
    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    fn start(&mut self, cx: &mut AppContext<'_>) {
        match cx.connect(self.config.remote) {
            Ok(socket) => self.socket = Some(socket),
            Err(e) => tracing::warn!(
                node = cx.node(),
                "bulk send towards {} could not start: {e:#}",
                self.config.remote
            ),
        }
    }

    fn on_notification(
        &mut self,
        cx: &mut AppContext<'_>,
        socket: SocketId,
        notification: SocketNotification,
    ) {
        if self.socket != Some(socket) {
            return;
        }

        match notification {
            SocketNotification::Connected => {
                tracing::debug!(node = cx.node(), "bulk send connected at {}", cx.now());
                self.connected = true;
                self.send_data(cx, socket);
            }
            SocketNotification::SendSpace(_) if self.connected => self.send_data(cx, socket),
            SocketNotification::ConnectionFailed => {
                tracing::warn!(
                    node = cx.node(),
                    "connection towards {} failed",
                    self.config.remote
                );
                self.closed = true;
            }
            SocketNotification::PeerClosed => cx.close(socket),
            _ => {}
        }
    }

    fn send_data(&mut self, cx: &mut AppContext<'_>, socket: SocketId) {
        if self.closed {
            return;
        }

        loop {
            let mut chunk = self.config.send_size as u64;
            if self.config.max_bytes > 0 {
                chunk = chunk.min(self.config.max_bytes - self.total_sent);
            }

            if chunk == 0 {
                break;
            }

            // Only whole chunks go out
            let chunk = chunk as u32;
            if cx.tx_available(socket) < chunk {
                return;
            }

            let sent = cx.send(socket, chunk);
            self.total_sent += sent as u64;
            if sent < chunk {
                return;
            }
        }

        tracing::debug!(
            node = cx.node(),
            "bulk send wrote all {} bytes at {}",
            self.total_sent,
            cx.now()
        );
        cx.close(socket);
        self.closed = true;
    }
}

/// Accepts connections on a port and counts what arrives
pub struct PacketSink {
    port: u16,
    total_rx: u64,
    accepted: Vec<SocketId>,
    first_rx: Option<SimTime>,
    last_rx: Option<SimTime>,
}

impl PacketSink {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            total_rx: 0,
            accepted: Vec::new(),
            first_rx: None,
            last_rx: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn total_rx(&self) -> u64 {
        self.total_rx
    }

    pub fn accepted_sockets(&self) -> &[SocketId] {
        &self.accepted
    }

    pub fn first_rx(&self) -> Option<SimTime> {
        self.first_rx
    }

    pub fn last_rx(&self) -> Option<SimTime> {
        self.last_rx
    }

    fn start(&mut self, cx: &mut AppContext<'_>) {
        if let Err(e) = cx.listen(self.port) {
            tracing::warn!(node = cx.node(), "packet sink could not start: {e:#}");
        }
    }

    fn on_notification(
        &mut self,
        cx: &mut AppContext<'_>,
        socket: SocketId,
        notification: SocketNotification,
    ) {
        match notification {
            SocketNotification::Connected => {
                if !self.accepted.contains(&socket) {
                    self.accepted.push(socket);
                }
            }
            SocketNotification::Received(bytes) => {
                let now = cx.now();
                self.first_rx.get_or_insert(now);
                self.last_rx = Some(now);
                self.total_rx += bytes;
            }
            SocketNotification::PeerClosed => cx.close(socket),
            _ => {}
        }
    }
}
