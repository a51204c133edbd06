use crate::sim::SimTime;
use std::net::{Ipv4Addr, SocketAddrV4};

pub const IPV4_OVERHEAD: usize = 20;
pub const TCP_OVERHEAD: usize = 20;
pub const IPPROTO_TCP: u8 = 6;

/// An IPv4 packet carrying a TCP segment
///
/// Payload bytes are not materialized; only their length travels through the network.
#[derive(Clone, Debug)]
pub struct Packet {
    /// Unique across the whole simulation, also for retransmitted segments
    pub uid: u64,
    pub ip: Ipv4Header,
    pub tcp: TcpHeader,
    pub payload_len: u32,
    /// Whether the transport layer sent this payload before
    pub retransmission: bool,
}

impl Packet {
    /// The size of the packet on the IP layer (headers included)
    pub fn size(&self) -> usize {
        IPV4_OVERHEAD + self.tcp.header_len() + self.payload_len as usize
    }

    pub fn source(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip.source, self.tcp.source_port)
    }

    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip.destination, self.tcp.destination_port)
    }
}

#[derive(Clone, Debug)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: u8,
    pub tos: u8,
    /// When the packet was handed to the IP layer of its source node
    pub sent_at: SimTime,
}

#[derive(Clone, Debug, Default)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    /// Byte sequence number (64-bit, so it never wraps during a simulation)
    pub sequence: u64,
    pub ack: u64,
    pub flags: TcpFlags,
    pub window: u32,
    /// Present on SYN segments of endpoints that want to use SACK
    pub sack_permitted: bool,
    /// Received out-of-order ranges, as `[start, end)` pairs
    pub sack_blocks: Vec<(u64, u64)>,
}

impl TcpHeader {
    pub fn header_len(&self) -> usize {
        let mut options = 0;
        if self.sack_permitted {
            options += 2;
        }
        if !self.sack_blocks.is_empty() {
            options += 2 + 8 * self.sack_blocks.len();
        }

        // Options are padded to a multiple of 4 bytes
        TCP_OVERHEAD + options.div_ceil(4) * 4
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub const SYN: TcpFlags = TcpFlags {
        syn: true,
        ack: false,
        fin: false,
        rst: false,
    };
    pub const SYN_ACK: TcpFlags = TcpFlags {
        syn: true,
        ack: true,
        fin: false,
        rst: false,
    };
    pub const ACK: TcpFlags = TcpFlags {
        syn: false,
        ack: true,
        fin: false,
        rst: false,
    };
    pub const FIN_ACK: TcpFlags = TcpFlags {
        syn: false,
        ack: true,
        fin: true,
        rst: false,
    };
    pub const RST: TcpFlags = TcpFlags {
        syn: false,
        ack: false,
        fin: false,
        rst: true,
    };

    /// The flags as they appear in the 13th byte of a TCP header
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.fin {
            bits |= 0x01;
        }
        if self.syn {
            bits |= 0x02;
        }
        if self.rst {
            bits |= 0x04;
        }
        if self.ack {
            bits |= 0x10;
        }
        bits
    }
}

#[test]
fn test_tcp_header_len_includes_padded_options() {
    let mut header = TcpHeader::default();
    assert_eq!(header.header_len(), 20);

    header.sack_permitted = true;
    assert_eq!(header.header_len(), 24);

    header.sack_permitted = false;
    header.sack_blocks = vec![(0, 10)];
    assert_eq!(header.header_len(), 32);

    header.sack_blocks = vec![(0, 10), (20, 30), (40, 50)];
    assert_eq!(header.header_len(), 48);
}
