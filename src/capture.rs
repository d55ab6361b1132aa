//! Capture reader - the producer side of the CLI pipeline.
//!
//! Decodes offline pcap/pcapng files (libpcap for the container format,
//! `etherparse` for header slicing) or JSON packet-record files into
//! [`PacketRecord`]s. Records are streamed in bounded batches over a
//! `tokio` channel from a blocking reader task; the collector closes the
//! packet set before analysis starts.
//!
//! Ethernet, raw IP, Linux cooked (SLL) and BSD loopback framing are
//! decoded; other link types are read as Ethernet after a warning.
//!
//! Malformed frames are never fatal: whatever layers could be decoded are
//! kept and the rest is left absent.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Instant;

use etherparse::{NetSlice, SlicedPacket, TcpOptionElement, TcpSlice, TransportSlice};
use pcap::{Capture, Linktype};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::InputConfig;
use crate::error::CaptureError;
use crate::packet::{AppProtocol, PacketRecord, TcpFlags, TcpOption, TcpSegment, Transport};

const ETHERTYPE_ARP: u16 = 0x0806;
const ARP_FRAME_LEN: usize = 42;
/// Address-family word in front of every NULL/LOOP frame.
const LOOPBACK_HEADER_LEN: usize = 4;

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// A pcap or pcapng file.
    Pcap(PathBuf),
    /// A JSON array of already-normalized packet records.
    Records(PathBuf),
}

impl CaptureSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Pcap(path) | Self::Records(path) => path,
        }
    }
}

/// Link layer of a capture file, as far as decoding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Raw IPv4/IPv6 with no link header.
    RawIp,
    /// Linux cooked capture (`tcpdump -i any`).
    LinuxSll,
    /// BSD loopback: a 4-byte address family, then IP.
    Loopback,
}

impl LinkLayer {
    /// Maps a pcap datalink type, or `None` if frames of that type cannot
    /// be decoded.
    pub fn for_linktype(linktype: Linktype) -> Option<Self> {
        match linktype {
            Linktype::ETHERNET => Some(Self::Ethernet),
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Some(Self::RawIp),
            Linktype::LINUX_SLL => Some(Self::LinuxSll),
            Linktype::NULL | Linktype::LOOP => Some(Self::Loopback),
            _ => None,
        }
    }
}

/// Statistics from one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub packets_read: usize,
    pub records_sent: usize,
    /// Frames kept with no decodable network layer.
    pub malformed: usize,
    pub batches: usize,
    pub duration_ms: u64,
}

/// Streams a capture source as record batches.
pub struct CaptureReader {
    source: CaptureSource,
    config: InputConfig,
}

impl CaptureReader {
    pub fn new(source: CaptureSource, config: InputConfig) -> Self {
        Self { source, config }
    }

    /// Starts reading on a blocking task. The receiver yields batches of at
    /// most `batch_size` records; the handle resolves once the source is
    /// exhausted.
    pub fn start(
        self,
    ) -> (
        mpsc::Receiver<Vec<PacketRecord>>,
        JoinHandle<Result<ReadStats, CaptureError>>,
    ) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || self.read_to(tx));
        (rx, handle)
    }

    fn read_to(&self, tx: mpsc::Sender<Vec<PacketRecord>>) -> Result<ReadStats, CaptureError> {
        let path = self.source.path();
        if !path.exists() {
            return Err(CaptureError::NotFound(path.display().to_string()));
        }

        let started = Instant::now();
        let mut batcher = Batcher::new(tx, self.config.batch_size);
        let mut stats = match &self.source {
            CaptureSource::Pcap(path) => self.read_pcap(path, &mut batcher)?,
            CaptureSource::Records(path) => self.read_records(path, &mut batcher)?,
        };
        batcher.flush()?;

        stats.records_sent = batcher.sent;
        stats.batches = batcher.batches;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Read complete: {} packets, {} records in {} batches, {} malformed, {}ms",
            stats.packets_read, stats.records_sent, stats.batches, stats.malformed, stats.duration_ms
        );
        Ok(stats)
    }

    fn read_pcap(&self, path: &Path, batcher: &mut Batcher) -> Result<ReadStats, CaptureError> {
        info!("Opening capture file: {}", path.display());
        let mut cap = Capture::from_file(path).map_err(|source| CaptureError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let datalink = cap.get_datalink();
        let link = LinkLayer::for_linktype(datalink).unwrap_or_else(|| {
            warn!(
                "Unsupported link type {:?} in {}, decoding frames as Ethernet",
                datalink,
                path.display()
            );
            LinkLayer::Ethernet
        });
        debug!("Capture link layer: {:?}", link);

        let mut stats = ReadStats::default();
        loop {
            if self.limit_reached(stats.packets_read) {
                info!("Reached max packets limit: {}", self.config.max_packets);
                break;
            }
            let packet = match cap.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => {
                    warn!("Stopping at unreadable capture record: {}", e);
                    break;
                }
            };

            let ts = packet.header.ts;
            let timestamp = ts.tv_sec as f64 + ts.tv_usec as f64 / 1_000_000.0;
            let record = normalize(stats.packets_read, timestamp, packet.data, link);
            if !record.has_ip() && !matches!(record.transport, Transport::Arp) {
                stats.malformed += 1;
            }
            stats.packets_read += 1;
            batcher.push(record)?;
        }
        Ok(stats)
    }

    fn read_records(&self, path: &Path, batcher: &mut Batcher) -> Result<ReadStats, CaptureError> {
        info!("Loading packet records: {}", path.display());
        let mut records = load_records(path)?;
        if self.config.max_packets > 0 {
            records.truncate(self.config.max_packets);
        }

        let mut stats = ReadStats::default();
        for record in records {
            stats.packets_read += 1;
            batcher.push(record)?;
        }
        Ok(stats)
    }

    fn limit_reached(&self, read: usize) -> bool {
        self.config.max_packets > 0 && read >= self.config.max_packets
    }
}

struct Batcher {
    tx: mpsc::Sender<Vec<PacketRecord>>,
    batch_size: usize,
    pending: Vec<PacketRecord>,
    sent: usize,
    batches: usize,
}

impl Batcher {
    fn new(tx: mpsc::Sender<Vec<PacketRecord>>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            tx,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            sent: 0,
            batches: 0,
        }
    }

    fn push(&mut self, record: PacketRecord) -> Result<(), CaptureError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CaptureError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let len = batch.len();
        self.tx
            .blocking_send(batch)
            .map_err(|_| CaptureError::ChannelClosed)?;
        self.sent += len;
        self.batches += 1;
        trace!("Sent batch of {} records", len);
        Ok(())
    }
}

/// Drains the channel into one packet set.
pub async fn collect(mut rx: mpsc::Receiver<Vec<PacketRecord>>) -> Vec<PacketRecord> {
    let mut packets = Vec::new();
    while let Some(batch) = rx.recv().await {
        packets.extend(batch);
    }
    packets
}

/// Reads a capture source to completion.
pub async fn read_all(
    source: CaptureSource,
    config: InputConfig,
) -> Result<(Vec<PacketRecord>, ReadStats), CaptureError> {
    let (rx, handle) = CaptureReader::new(source, config).start();
    let packets = collect(rx).await;
    let stats = handle
        .await
        .map_err(|e| CaptureError::Io(std::io::Error::other(e)))??;
    Ok((packets, stats))
}

/// Loads a JSON array of packet records.
pub fn load_records(path: &Path) -> Result<Vec<PacketRecord>, CaptureError> {
    if !path.exists() {
        return Err(CaptureError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| CaptureError::Records {
        path: path.display().to_string(),
        source,
    })
}

/// Decodes one captured frame. Never fails: undecodable layers are left
/// absent.
pub fn normalize(index: usize, timestamp: f64, data: &[u8], link: LinkLayer) -> PacketRecord {
    let mut record = PacketRecord::bare(index, timestamp, data.len() as u32);

    if link == LinkLayer::Ethernet {
        if let Some((src, dst)) = arp_addresses(data) {
            record.src_ip = src.to_string();
            record.dst_ip = dst.to_string();
            record.transport = Transport::Arp;
            trace!("#{} ARP {} -> {}", index, record.src_ip, record.dst_ip);
            return record;
        }
    }

    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(data).map_err(|e| e.to_string()),
        LinkLayer::RawIp => SlicedPacket::from_ip(data).map_err(|e| e.to_string()),
        LinkLayer::LinuxSll => SlicedPacket::from_linux_sll(data).map_err(|e| e.to_string()),
        LinkLayer::Loopback => match data.get(LOOPBACK_HEADER_LEN..) {
            Some(ip) => SlicedPacket::from_ip(ip).map_err(|e| e.to_string()),
            None => Err("truncated loopback header".to_string()),
        },
    };
    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(e) => {
            debug!("#{} undecodable frame ({} bytes): {}", index, data.len(), e);
            return record;
        }
    };

    let ip_protocol = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            record.src_ip = IpAddr::from(header.source()).to_string();
            record.dst_ip = IpAddr::from(header.destination()).to_string();
            Some(ipv4.payload().ip_number.0)
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            record.src_ip = IpAddr::from(header.source()).to_string();
            record.dst_ip = IpAddr::from(header.destination()).to_string();
            Some(ipv6.payload().ip_number.0)
        }
        _ => None,
    };

    record.transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            record.app = AppProtocol::for_tcp(tcp.source_port(), tcp.destination_port());
            Transport::Tcp(tcp_segment(tcp))
        }
        Some(TransportSlice::Udp(udp)) => {
            record.app = AppProtocol::for_udp(udp.source_port(), udp.destination_port());
            Transport::Udp {
                src_port: udp.source_port(),
                dst_port: udp.destination_port(),
            }
        }
        Some(TransportSlice::Icmpv4(_)) | Some(TransportSlice::Icmpv6(_)) => Transport::Icmp,
        _ => Transport::Other { ip_protocol },
    };

    trace!(
        "#{} {} {} -> {} ({} bytes)",
        index,
        record.protocol_label(),
        record.src_ip,
        record.dst_ip,
        record.size
    );
    record
}

/// Sender and target protocol addresses of an Ethernet/IPv4 ARP frame.
fn arp_addresses(data: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if data.len() < ARP_FRAME_LEN {
        return None;
    }
    if u16::from_be_bytes([data[12], data[13]]) != ETHERTYPE_ARP {
        return None;
    }
    let src = Ipv4Addr::new(data[28], data[29], data[30], data[31]);
    let dst = Ipv4Addr::new(data[38], data[39], data[40], data[41]);
    Some((src, dst))
}

fn tcp_segment(tcp: &TcpSlice<'_>) -> TcpSegment {
    let bits = [
        (tcp.fin(), TcpFlags::FIN),
        (tcp.syn(), TcpFlags::SYN),
        (tcp.rst(), TcpFlags::RST),
        (tcp.psh(), TcpFlags::PSH),
        (tcp.ack(), TcpFlags::ACK),
        (tcp.urg(), TcpFlags::URG),
        (tcp.ece(), TcpFlags::ECE),
        (tcp.cwr(), TcpFlags::CWR),
    ];
    let flags = bits
        .iter()
        .filter(|(set, _)| *set)
        .fold(0u8, |acc, (_, bit)| acc | bit);

    let options = tcp
        .options_iterator()
        .filter_map(|opt| opt.ok())
        .filter_map(tcp_option)
        .collect();

    TcpSegment {
        src_port: tcp.source_port(),
        dst_port: tcp.destination_port(),
        seq: Some(tcp.sequence_number()),
        ack: Some(tcp.acknowledgment_number()),
        flags: Some(TcpFlags(flags)),
        window: Some(tcp.window_size()),
        options,
    }
}

fn tcp_option(option: TcpOptionElement) -> Option<TcpOption> {
    match option {
        TcpOptionElement::Noop => None,
        TcpOptionElement::MaximumSegmentSize(mss) => Some(TcpOption::new("MSS", mss.to_string())),
        TcpOptionElement::WindowScale(shift) => Some(TcpOption::new("WScale", shift.to_string())),
        TcpOptionElement::SelectiveAcknowledgementPermitted => Some(TcpOption::new("SAckOK", "")),
        TcpOptionElement::SelectiveAcknowledgement(first, rest) => {
            let blocks: Vec<String> = std::iter::once(first)
                .chain(rest.into_iter().flatten())
                .map(|(left, right)| format!("{}-{}", left, right))
                .collect();
            Some(TcpOption::new("SAck", blocks.join(",")))
        }
        TcpOptionElement::Timestamp(value, echo) => {
            Some(TcpOption::new("Timestamp", format!("{},{}", value, echo)))
        }
    }
}
