use crate::packet::{IPPROTO_TCP, Packet};
use crate::sim::SimTime;
use anyhow::Context;
use parking_lot::Mutex;
use pcap_file::pcapng::PcapNgWriter;
use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
use pcap_file::pcapng::blocks::interface_description::InterfaceDescriptionBlock;
use pcap_file::pcapng::blocks::section_header::SectionHeaderBlock;
use pcap_file::{DataLink, Endianness};
use pnet_packet::ip::IpNextHeaderProtocol;
use pnet_packet::ipv4::MutableIpv4Packet;
use pnet_packet::tcp::{MutableTcpPacket, TcpOption};
use pnet_packet::{PacketSize, ipv4, tcp};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

pub trait PcapExporterFactory: Send + Sync {
    /// Creates an exporter for a capture called `name` (e.g. `server-0-1`)
    fn create_pcap_exporter(&self, name: &str) -> anyhow::Result<PcapExporter>;
}

pub struct NoOpPcapExporterFactory;
impl PcapExporterFactory for NoOpPcapExporterFactory {
    fn create_pcap_exporter(&self, _: &str) -> anyhow::Result<PcapExporter> {
        PcapExporter::new(std::io::sink())
    }
}

/// Writes every capture to `{directory}/{name}.pcap`
pub struct FileBasedPcapExporterFactory {
    pub directory: PathBuf,
}

impl PcapExporterFactory for FileBasedPcapExporterFactory {
    fn create_pcap_exporter(&self, name: &str) -> anyhow::Result<PcapExporter> {
        let path = self.directory.join(format!("{name}.pcap"));
        let pcap_file = fs::File::create(&path)
            .with_context(|| format!("failed to open {} for writing", path.display()))?;
        PcapExporter::new(pcap_file)
    }
}

type BoxedWriter = BufWriter<Box<dyn Write + Send + Sync + 'static>>;

pub struct PcapExporter {
    total_tracked_packets: u64,
    writer: Mutex<PcapNgWriter<BoxedWriter>>,
}

impl PcapExporter {
    pub fn new(writer: impl Write + Send + Sync + 'static) -> anyhow::Result<Self> {
        let writer: Box<dyn Write + Send + Sync + 'static> = Box::new(writer);
        let mut writer = PcapNgWriter::with_section_header(
            BufWriter::new(writer),
            SectionHeaderBlock {
                endianness: Endianness::Big,
                major_version: 1,
                minor_version: 0,
                section_length: 0,
                options: vec![],
            },
        )
        .context("failed to write pcap section header")?;

        writer
            .write_pcapng_block(InterfaceDescriptionBlock {
                linktype: DataLink::IPV4,
                snaplen: 65535,
                options: vec![],
            })
            .context("failed to write pcap interface description")?;

        Ok(Self {
            total_tracked_packets: 0,
            writer: Mutex::new(writer),
        })
    }

    pub fn total_tracked_packets(&self) -> u64 {
        self.total_tracked_packets
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.writer
            .lock()
            .get_mut()
            .flush()
            .context("failed to flush pcap writer")
    }

    pub fn track_packet(&mut self, now: SimTime, packet: &Packet) -> anyhow::Result<()> {
        let ip_packet = serialize_packet(packet)?;
        self.total_tracked_packets += 1;

        self.writer
            .lock()
            .write_pcapng_block(EnhancedPacketBlock {
                interface_id: 0,
                timestamp: correct_timestamp(now),
                original_len: ip_packet.len() as u32,
                data: ip_packet.into(),
                options: Vec::new(),
            })
            .context("failed to write packet to pcap")?;
        Ok(())
    }
}

/// Builds the on-the-wire bytes of the packet, with a zeroed payload
fn serialize_packet(packet: &Packet) -> anyhow::Result<Vec<u8>> {
    let source = packet.ip.source;
    let destination = packet.ip.destination;
    let tcp_len = packet.tcp.header_len();
    let total_len = packet.size();
    let mut buffer = vec![0; total_len];

    let mut tcp_writer = MutableTcpPacket::new(&mut buffer[20..])
        .context("buffer too small for a TCP header")?;
    tcp_writer.set_source(packet.tcp.source_port);
    tcp_writer.set_destination(packet.tcp.destination_port);
    // Sequence numbers are 64-bit internally, so they wrap on the wire
    tcp_writer.set_sequence(packet.tcp.sequence as u32);
    tcp_writer.set_acknowledgement(packet.tcp.ack as u32);
    tcp_writer.set_data_offset((tcp_len / 4) as u8);
    tcp_writer.set_flags(packet.tcp.flags.bits());
    tcp_writer.set_window(packet.tcp.window.min(u16::MAX as u32) as u16);
    tcp_writer.set_options(&tcp_options(packet, tcp_len));
    let checksum = tcp::ipv4_checksum(&tcp_writer.to_immutable(), &source, &destination);
    tcp_writer.set_checksum(checksum);
    drop(tcp_writer);

    let mut ip_writer =
        MutableIpv4Packet::new(&mut buffer).context("buffer too small for an IPv4 header")?;
    ip_writer.set_version(4);
    ip_writer.set_header_length(5);
    ip_writer.set_dscp(packet.ip.tos >> 2);
    ip_writer.set_ecn(packet.ip.tos & 0b11);
    ip_writer.set_identification(packet.uid as u16);
    ip_writer.set_flags(0b010);
    ip_writer.set_fragment_offset(0);
    ip_writer.set_ttl(packet.ip.ttl);
    ip_writer.set_next_level_protocol(IpNextHeaderProtocol::new(IPPROTO_TCP));
    ip_writer.set_source(source);
    ip_writer.set_destination(destination);
    ip_writer.set_total_length(total_len as u16);
    let checksum = ipv4::checksum(&ip_writer.to_immutable());
    ip_writer.set_checksum(checksum);
    let ip_len = ip_writer.packet_size();
    drop(ip_writer);

    buffer.truncate(ip_len);
    Ok(buffer)
}

fn tcp_options(packet: &Packet, tcp_len: usize) -> Vec<TcpOption> {
    let mut options = Vec::new();
    let mut len = 0;
    if packet.tcp.sack_permitted {
        options.push(TcpOption::sack_perm());
        len += 2;
    }
    if !packet.tcp.sack_blocks.is_empty() {
        let edges: Vec<u32> = packet
            .tcp
            .sack_blocks
            .iter()
            .flat_map(|(start, end)| [*start as u32, *end as u32])
            .collect();
        options.push(TcpOption::selective_ack(&edges));
        len += 2 + 4 * edges.len();
    }

    // Pad up to the header length
    while len < tcp_len - 20 {
        options.push(TcpOption::nop());
        len += 1;
    }
    options
}

fn correct_timestamp(now: SimTime) -> Duration {
    // The library multiplies the timestamp by 1000 when writing it, so we hand it a value that is
    // an order of magnitude smaller
    Duration::from_nanos(now.as_nanos() / 1000)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{Ipv4Header, TcpFlags, TcpHeader};
    use pcap_file::pcapng::{Block, PcapNgReader};
    use pnet_packet::Packet as _;
    use pnet_packet::ipv4::Ipv4Packet;
    use pnet_packet::tcp::TcpPacket;
    use std::net::Ipv4Addr;

    fn packet() -> Packet {
        Packet {
            uid: 7,
            ip: Ipv4Header {
                source: Ipv4Addr::new(10, 0, 1, 1),
                destination: Ipv4Addr::new(10, 0, 2, 2),
                ttl: 63,
                tos: 0,
                sent_at: SimTime::ZERO,
            },
            tcp: TcpHeader {
                source_port: 49153,
                destination_port: 9,
                sequence: (1 << 32) + 1001,
                ack: 1,
                flags: TcpFlags::ACK,
                window: 65535,
                sack_permitted: false,
                sack_blocks: vec![(3000, 4000)],
            },
            payload_len: 536,
            retransmission: false,
        }
    }

    #[test]
    fn test_serialized_packet_matches_headers() {
        let packet = packet();
        let bytes = serialize_packet(&packet).unwrap();
        assert_eq!(bytes.len(), packet.size());

        let ip = Ipv4Packet::new(&bytes).unwrap();
        assert_eq!(ip.get_source(), Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(ip.get_ttl(), 63);
        assert_eq!(ip.get_total_length() as usize, packet.size());

        let tcp = TcpPacket::new(ip.payload()).unwrap();
        assert_eq!(tcp.get_destination(), 9);
        assert_eq!(tcp.get_sequence(), 1001);
        assert_eq!(tcp.get_data_offset() as usize * 4, packet.tcp.header_len());
        assert_eq!(tcp.payload().len(), 536);
    }

    #[test]
    fn test_capture_file_contains_packets() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileBasedPcapExporterFactory {
            directory: dir.path().to_path_buf(),
        };

        let mut exporter = factory.create_pcap_exporter("server-0-1").unwrap();
        exporter
            .track_packet(SimTime::from_millis(1), &packet())
            .unwrap();
        exporter
            .track_packet(SimTime::from_millis(2), &packet())
            .unwrap();
        exporter.flush().unwrap();
        assert_eq!(exporter.total_tracked_packets(), 2);
        drop(exporter);

        let file = fs::File::open(dir.path().join("server-0-1.pcap")).unwrap();
        let mut reader = PcapNgReader::new(file).unwrap();
        let mut packets = 0;
        while let Some(block) = reader.next_block() {
            if let Block::EnhancedPacket(block) = block.unwrap() {
                assert_eq!(block.original_len as usize, packet().size());
                packets += 1;
            }
        }
        assert_eq!(packets, 2);
    }
}
