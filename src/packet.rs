//! Normalized packet records.
//!
//! A [`PacketRecord`] is populated exactly once by the normalizer (see
//! [`crate::capture`]) and is read-only afterwards. Layer information is
//! carried as an explicit [`Transport`] tag so detectors never have to
//! re-probe the packet; fields of a layer that was not detected are simply
//! absent.

use serde::{Deserialize, Serialize};

/// Placeholder used when the network layer carried no address.
pub const UNKNOWN_ADDR: &str = "Unknown";

/// A single decoded packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Ordinal assigned by the normalizer (position in the capture).
    pub index: usize,
    /// Capture timestamp in seconds.
    pub timestamp: f64,
    /// Captured length in bytes.
    pub size: u32,
    #[serde(default = "unknown_addr")]
    pub src_ip: String,
    #[serde(default = "unknown_addr")]
    pub dst_ip: String,
    #[serde(flatten)]
    pub transport: Transport,
    /// Application protocol guessed from well-known ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppProtocol>,
}

fn unknown_addr() -> String {
    UNKNOWN_ADDR.to_string()
}

impl PacketRecord {
    /// Creates a record with no detected layers.
    pub fn bare(index: usize, timestamp: f64, size: u32) -> Self {
        Self {
            index,
            timestamp,
            size,
            src_ip: unknown_addr(),
            dst_ip: unknown_addr(),
            transport: Transport::Other { ip_protocol: None },
            app: None,
        }
    }

    /// Returns true when the network layer supplied real addresses.
    pub fn has_ip(&self) -> bool {
        self.src_ip != UNKNOWN_ADDR || self.dst_ip != UNKNOWN_ADDR
    }

    pub fn src_port(&self) -> Option<u16> {
        match &self.transport {
            Transport::Tcp(seg) => Some(seg.src_port),
            Transport::Udp { src_port, .. } => Some(*src_port),
            _ => None,
        }
    }

    pub fn dst_port(&self) -> Option<u16> {
        match &self.transport {
            Transport::Tcp(seg) => Some(seg.dst_port),
            Transport::Udp { dst_port, .. } => Some(*dst_port),
            _ => None,
        }
    }

    /// TCP header fields, if this is a TCP segment.
    pub fn tcp(&self) -> Option<&TcpSegment> {
        match &self.transport {
            Transport::Tcp(seg) => Some(seg),
            _ => None,
        }
    }

    /// Highest protocol layer, as used for protocol bucketing.
    pub fn protocol_label(&self) -> &'static str {
        match (&self.transport, self.app) {
            (_, Some(app)) => app.label(),
            (Transport::Tcp(_), None) => "TCP",
            (Transport::Udp { .. }, None) => "UDP",
            (Transport::Icmp, None) => "ICMP",
            (Transport::Arp, None) => "ARP",
            (Transport::Other { .. }, None) => "Other",
        }
    }

    /// Returns true if either port is in `ports`.
    pub fn touches_port(&self, ports: &[u16]) -> bool {
        self.src_port().is_some_and(|p| ports.contains(&p))
            || self.dst_port().is_some_and(|p| ports.contains(&p))
    }
}

/// Transport layer, tagged by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Transport {
    Tcp(TcpSegment),
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    Icmp,
    Arp,
    Other {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_protocol: Option<u8>,
    },
}

/// TCP header fields. Every field past the ports is optional so partially
/// decoded segments are still usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<TcpFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<TcpOption>,
}

impl TcpSegment {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            ..Self::default()
        }
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = Some(window);
        self
    }

    /// Looks up an option value by name (e.g. `"WScale"`).
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|opt| opt.name == name)
            .map(|opt| opt.value.as_str())
    }
}

/// TCP control bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_ack(&self) -> bool {
        self.contains(Self::ACK)
    }
}

impl std::fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(u8, char); 8] = [
            (TcpFlags::FIN, 'F'),
            (TcpFlags::SYN, 'S'),
            (TcpFlags::RST, 'R'),
            (TcpFlags::PSH, 'P'),
            (TcpFlags::ACK, 'A'),
            (TcpFlags::URG, 'U'),
            (TcpFlags::ECE, 'E'),
            (TcpFlags::CWR, 'C'),
        ];
        for (bit, name) in NAMES {
            if self.contains(bit) {
                write!(f, "{}", name)?;
            }
        }
        Ok(())
    }
}

/// A decoded TCP option as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpOption {
    pub name: String,
    pub value: String,
}

impl TcpOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Application protocol sub-tag, inferred from ports only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    Http,
    Tls,
    Dns,
}

impl AppProtocol {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Tls => "TLS/SSL",
            Self::Dns => "DNS",
        }
    }

    /// Guesses the application protocol of a TCP segment.
    pub fn for_tcp(src_port: u16, dst_port: u16) -> Option<Self> {
        if is_http_port(src_port) || is_http_port(dst_port) {
            Some(Self::Http)
        } else if is_tls_port(src_port) || is_tls_port(dst_port) {
            Some(Self::Tls)
        } else if is_dns_port(src_port) || is_dns_port(dst_port) {
            Some(Self::Dns)
        } else {
            None
        }
    }

    /// Guesses the application protocol of a UDP datagram.
    pub fn for_udp(src_port: u16, dst_port: u16) -> Option<Self> {
        if is_dns_port(src_port) || is_dns_port(dst_port) {
            Some(Self::Dns)
        } else {
            None
        }
    }
}

impl std::fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

pub fn is_http_port(port: u16) -> bool {
    matches!(port, 80 | 8000 | 8080)
}

pub fn is_tls_port(port: u16) -> bool {
    matches!(port, 443 | 465 | 563 | 853 | 993 | 995 | 8443)
}

pub fn is_dns_port(port: u16) -> bool {
    matches!(port, 53 | 5353)
}
