//! Flow reconstruction.
//!
//! Groups time-ordered packet records into directional flows. Forward and
//! reverse traffic of a conversation land in different flows; packets
//! without a network layer get synthetic keys so nothing is dropped.

use std::collections::BTreeMap;

use tracing::debug;

use crate::packet::{PacketRecord, Transport};

/// Directional flow identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowKey {
    /// IP traffic, keyed by the endpoint 4-tuple.
    Endpoints {
        src_ip: String,
        src_port: Option<u16>,
        dst_ip: String,
        dst_port: Option<u16>,
    },
    /// ARP traffic, keyed by sender and target protocol addresses.
    Arp { src_ip: String, dst_ip: String },
    /// A packet with no usable addressing, keyed by its ordinal.
    Unknown(usize),
}

impl FlowKey {
    /// Derives the flow key for a record.
    pub fn for_record(record: &PacketRecord) -> Self {
        match &record.transport {
            Transport::Arp => Self::Arp {
                src_ip: record.src_ip.clone(),
                dst_ip: record.dst_ip.clone(),
            },
            _ if !record.has_ip() => Self::Unknown(record.index),
            _ => Self::Endpoints {
                src_ip: record.src_ip.clone(),
                src_port: record.src_port(),
                dst_ip: record.dst_ip.clone(),
                dst_port: record.dst_port(),
            },
        }
    }

    /// Returns the stable identity string (`src:sport->dst:dport`).
    pub fn display(&self) -> String {
        fn port(p: &Option<u16>) -> String {
            p.map(|p| p.to_string()).unwrap_or_else(|| "*".to_string())
        }

        match self {
            Self::Endpoints {
                src_ip,
                src_port,
                dst_ip,
                dst_port,
            } => format!(
                "{}:{}->{}:{}",
                src_ip,
                port(src_port),
                dst_ip,
                port(dst_port)
            ),
            Self::Arp { src_ip, dst_ip } => format!("ARP {}->{}", src_ip, dst_ip),
            Self::Unknown(index) => format!("unknown flow #{}", index),
        }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// One directional flow with its packets in timestamp order.
#[derive(Debug, Clone)]
pub struct Flow<'a> {
    pub key: FlowKey,
    /// Cached `key.display()`, used as the flow name in events.
    pub name: String,
    pub packets: Vec<&'a PacketRecord>,
}

impl<'a> Flow<'a> {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.packets.iter().map(|p| p.timestamp).collect()
    }

    /// Consecutive timestamp differences (length `len() - 1`).
    pub fn delays(&self) -> Vec<f64> {
        self.packets
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect()
    }

    pub fn first_seen(&self) -> f64 {
        self.packets.first().map(|p| p.timestamp).unwrap_or(0.0)
    }

    pub fn last_seen(&self) -> f64 {
        self.packets.last().map(|p| p.timestamp).unwrap_or(0.0)
    }

    pub fn total_bytes(&self) -> u64 {
        self.packets.iter().map(|p| p.size as u64).sum()
    }
}

/// All flows of one capture, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct FlowTable<'a> {
    flows: Vec<Flow<'a>>,
}

impl<'a> FlowTable<'a> {
    /// Builds the flow table. `packets` must already be in timestamp order
    /// (see [`crate::delay::PacketTimeline`]); per-flow order follows it.
    pub fn reconstruct(packets: &'a [PacketRecord]) -> Self {
        let mut grouped: BTreeMap<FlowKey, Vec<&'a PacketRecord>> = BTreeMap::new();
        for packet in packets {
            grouped
                .entry(FlowKey::for_record(packet))
                .or_default()
                .push(packet);
        }

        let flows: Vec<Flow<'a>> = grouped
            .into_iter()
            .map(|(key, packets)| Flow {
                name: key.display(),
                key,
                packets,
            })
            .collect();

        debug!(
            "Reconstructed {} flows from {} packets ({} analyzable)",
            flows.len(),
            packets.len(),
            flows.iter().filter(|f| f.len() >= 2).count()
        );

        Self { flows }
    }

    /// Total number of flows, including single-packet ones.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flow<'a>> {
        self.flows.iter()
    }

    pub fn as_slice(&self) -> &[Flow<'a>] {
        &self.flows
    }

    /// Flows with at least two packets, the only ones with delays.
    pub fn analyzable(&self) -> impl Iterator<Item = &Flow<'a>> {
        self.flows.iter().filter(|f| f.len() >= 2)
    }

    pub fn analyzable_count(&self) -> usize {
        self.analyzable().count()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&Flow<'a>> {
        self.flows
            .binary_search_by(|flow| flow.key.cmp(key))
            .ok()
            .map(|i| &self.flows[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpSegment;

    fn tcp(index: usize, ts: f64, src: &str, sport: u16, dst: &str, dport: u16) -> PacketRecord {
        PacketRecord {
            index,
            timestamp: ts,
            size: 100,
            src_ip: src.into(),
            dst_ip: dst.into(),
            transport: Transport::Tcp(TcpSegment::new(sport, dport)),
            app: None,
        }
    }

    #[test]
    fn test_flow_key_display() {
        let record = tcp(0, 0.0, "192.168.1.1", 40000, "10.0.0.1", 443);
        let key = FlowKey::for_record(&record);
        assert_eq!(key.display(), "192.168.1.1:40000->10.0.0.1:443");
    }

    #[test]
    fn test_flow_key_icmp_uses_wildcard_ports() {
        let mut record = tcp(0, 0.0, "192.168.1.1", 0, "10.0.0.1", 0);
        record.transport = Transport::Icmp;
        assert_eq!(FlowKey::for_record(&record).display(), "192.168.1.1:*->10.0.0.1:*");
    }

    #[test]
    fn test_flow_key_synthetic_for_missing_ip() {
        let record = PacketRecord::bare(12, 1.0, 60);
        assert_eq!(FlowKey::for_record(&record), FlowKey::Unknown(12));
        assert_eq!(FlowKey::for_record(&record).display(), "unknown flow #12");

        let mut arp = PacketRecord::bare(13, 1.0, 42);
        arp.transport = Transport::Arp;
        arp.src_ip = "10.0.0.1".into();
        arp.dst_ip = "10.0.0.254".into();
        assert_eq!(FlowKey::for_record(&arp).display(), "ARP 10.0.0.1->10.0.0.254");
    }

    #[test]
    fn test_reconstruct_is_directional() {
        let packets = vec![
            tcp(0, 0.0, "10.0.0.1", 40000, "10.0.0.2", 80),
            tcp(1, 0.1, "10.0.0.2", 80, "10.0.0.1", 40000),
            tcp(2, 0.2, "10.0.0.1", 40000, "10.0.0.2", 80),
        ];
        let table = FlowTable::reconstruct(&packets);

        assert_eq!(table.len(), 2);
        assert_eq!(table.analyzable_count(), 1);

        let forward = FlowKey::for_record(&packets[0]);
        let flow = table.get(&forward).unwrap();
        assert_eq!(flow.len(), 2);
        assert_eq!(flow.delays(), vec![0.2]);
    }

    #[test]
    fn test_reconstruct_empty() {
        let table = FlowTable::reconstruct(&[]);
        assert!(table.is_empty());
        assert_eq!(table.analyzable_count(), 0);
    }
}
