//! Capture-wide traffic statistics.
//!
//! ## Packet Loss Estimate
//! With m the median inter-packet delay, every gap g > 3m is assumed to hide
//! ⌊g / m⌋ missing packets.
//!
//! ## Periodicity
//! The autocorrelation r(k) = Σ dᵢ·dᵢ₊ₖ of the delay series is scanned for
//! local maxima; the lag of the second one times the mean delay is the
//! reported period.
//!
//! ## Per-Packet Delay
//! For TCP and UDP packets, the delay is the time since the last packet of
//! the same conversation travelling the other way. The first packet of a
//! conversation, and every non-transport packet, has delay 0.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::delay::PacketTimeline;
use crate::packet::Transport;
use crate::stats::DelayStats;

/// Statistics need at least this many packets.
pub const MIN_PACKETS: usize = 10;
/// Autocorrelation needs more than this many delays.
pub const MIN_AUTOCORRELATION_DELAYS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficStatistics {
    pub mean_delay: f64,
    pub median_delay: f64,
    pub std_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    pub jitter: f64,
    pub packet_count: usize,
    pub packet_loss_count: u64,
    pub packet_loss_percentage: f64,
    /// `None` when the series is too short to test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodic_pattern_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodicity_seconds: Option<f64>,
}

/// One packet with its request/response delay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketDelay {
    pub packet_index: usize,
    pub timestamp: f64,
    pub protocol: String,
    pub size: u32,
    pub src_ip: String,
    pub dst_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    pub delay: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolLatency {
    /// Number of same-protocol delays.
    pub count: usize,
    pub total_delay: f64,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub median_latency: f64,
    pub std_latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolStats {
    pub count: usize,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<ProtocolLatency>,
}

/// Computes capture-wide delay statistics, `None` for short captures.
pub fn statistics(timeline: &PacketTimeline) -> Option<TrafficStatistics> {
    if timeline.len() < MIN_PACKETS {
        return None;
    }

    let delays = timeline.inter_packet_delays();
    let summary = DelayStats::from_samples(delays);
    let packet_loss_count = estimate_lost_packets(delays, summary.median);

    let (periodic_pattern_detected, periodicity_seconds) =
        if delays.len() > MIN_AUTOCORRELATION_DELAYS {
            let lags = find_peaks(&autocorrelation(delays));
            match lags.get(1) {
                Some(&lag) => (Some(true), Some(lag as f64 * summary.mean)),
                None => (Some(false), None),
            }
        } else {
            (None, None)
        };

    debug!(
        "Traffic statistics: {} packets, {} estimated lost, periodic: {:?}",
        timeline.len(),
        packet_loss_count,
        periodic_pattern_detected
    );

    Some(TrafficStatistics {
        mean_delay: summary.mean,
        median_delay: summary.median,
        std_delay: summary.std_dev,
        min_delay: summary.min,
        max_delay: summary.max,
        jitter: summary.std_dev,
        packet_count: timeline.len(),
        packet_loss_count,
        packet_loss_percentage: packet_loss_count as f64 / timeline.len() as f64 * 100.0,
        periodic_pattern_detected,
        periodicity_seconds,
    })
}

fn estimate_lost_packets(delays: &[f64], median: f64) -> u64 {
    if median <= 0.0 {
        return 0;
    }
    delays
        .iter()
        .filter(|&&gap| gap > 3.0 * median)
        .map(|&gap| (gap / median).floor() as u64)
        .sum()
}

/// Non-negative lags of the full cross-correlation of `values` with itself.
fn autocorrelation(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|lag| {
            values[..values.len() - lag]
                .iter()
                .zip(&values[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
        })
        .collect()
}

/// Indices of local maxima with a non-negative height. Flat peaks report
/// their middle sample; the first and last samples are never peaks.
fn find_peaks(values: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if values.len() < 3 {
        return peaks;
    }

    let last = values.len() - 1;
    let mut i = 1;
    while i < last {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                let mid = (i + ahead - 1) / 2;
                if values[mid] >= 0.0 {
                    peaks.push(mid);
                }
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Per-protocol packet counts, bytes and same-protocol latency.
pub fn protocol_distribution(timeline: &PacketTimeline) -> BTreeMap<String, ProtocolStats> {
    let mut grouped: BTreeMap<&'static str, (u64, Vec<f64>)> = BTreeMap::new();
    for packet in timeline.packets() {
        let entry = grouped.entry(packet.protocol_label()).or_default();
        entry.0 += packet.size as u64;
        entry.1.push(packet.timestamp);
    }

    grouped
        .into_iter()
        .map(|(label, (bytes, timestamps))| {
            let latency = (timestamps.len() > 1).then(|| {
                let delays: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
                let summary = DelayStats::from_samples(&delays);
                ProtocolLatency {
                    count: delays.len(),
                    total_delay: delays.iter().sum(),
                    avg_latency: summary.mean,
                    min_latency: summary.min,
                    max_latency: summary.max,
                    median_latency: summary.median,
                    std_latency: summary.std_dev,
                }
            });
            (
                label.to_string(),
                ProtocolStats {
                    count: timestamps.len(),
                    bytes,
                    latency,
                },
            )
        })
        .collect()
}

type ConversationKey<'a> = (&'a str, &'a str, Option<u16>, Option<u16>);

/// Lists every packet in timeline order with its delay since the last
/// packet in the reverse direction of its conversation.
pub fn packet_delays(timeline: &PacketTimeline) -> Vec<PacketDelay> {
    let mut last_seen: BTreeMap<ConversationKey<'_>, f64> = BTreeMap::new();

    timeline
        .packets()
        .iter()
        .map(|packet| {
            let (src_port, dst_port) = (packet.src_port(), packet.dst_port());
            let delay = match &packet.transport {
                Transport::Tcp(_) | Transport::Udp { .. } => {
                    let forward = (
                        packet.src_ip.as_str(),
                        packet.dst_ip.as_str(),
                        src_port,
                        dst_port,
                    );
                    let reverse = (forward.1, forward.0, dst_port, src_port);
                    let delay = last_seen
                        .get(&reverse)
                        .map_or(0.0, |&request| packet.timestamp - request);
                    last_seen.insert(forward, packet.timestamp);
                    delay
                }
                _ => 0.0,
            };

            PacketDelay {
                packet_index: packet.index,
                timestamp: packet.timestamp,
                protocol: packet.protocol_label().to_string(),
                size: packet.size,
                src_ip: packet.src_ip.clone(),
                dst_ip: packet.dst_ip.clone(),
                src_port,
                dst_port,
                delay,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketRecord, TcpSegment};

    fn timeline(timestamps: &[f64]) -> PacketTimeline {
        PacketTimeline::new(
            timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| PacketRecord::bare(i, ts, 100))
                .collect(),
        )
    }

    fn cumulative(delays: &[f64]) -> Vec<f64> {
        let mut ts = 0.0;
        let mut out = vec![ts];
        for d in delays {
            ts += d;
            out.push(ts);
        }
        out
    }

    #[test]
    fn test_short_capture_has_no_statistics() {
        assert!(statistics(&timeline(&[0.0, 1.0, 2.0])).is_none());
    }

    #[test]
    fn test_packet_loss_estimate() {
        // Nine regular gaps of 125 ms and one of 500 ms.
        let mut delays = vec![0.125; 9];
        delays.push(0.5);
        let stats = statistics(&timeline(&cumulative(&delays))).unwrap();

        assert_eq!(stats.packet_count, 11);
        assert_eq!(stats.median_delay, 0.125);
        assert_eq!(stats.packet_loss_count, 4);
        assert!((stats.packet_loss_percentage - 4.0 / 11.0 * 100.0).abs() < 1e-9);
        assert_eq!(stats.jitter, stats.std_delay);
        assert!(stats.periodic_pattern_detected.is_none());
    }

    #[test]
    fn test_periodicity_from_autocorrelation() {
        let delays: Vec<f64> = [0.125, 0.125, 0.125, 1.0].repeat(6);
        let stats = statistics(&timeline(&cumulative(&delays))).unwrap();

        assert_eq!(stats.periodic_pattern_detected, Some(true));
        // Peaks at lags 4, 8, ...; the second one is used.
        assert!((stats.periodicity_seconds.unwrap() - 2.75).abs() < 1e-9);
    }

    #[test]
    fn test_constant_delays_have_no_peaks() {
        let delays = vec![0.125; 30];
        let stats = statistics(&timeline(&cumulative(&delays))).unwrap();
        assert_eq!(stats.periodic_pattern_detected, Some(false));
        assert!(stats.periodicity_seconds.is_none());
        assert_eq!(stats.packet_loss_count, 0);
    }

    #[test]
    fn test_find_peaks_plateau() {
        assert_eq!(find_peaks(&[0.0, 1.0, 1.0, 1.0, 0.0]), vec![2]);
        assert_eq!(find_peaks(&[0.0, 2.0, 1.0, 3.0, 1.0]), vec![1, 3]);
        assert!(find_peaks(&[3.0, 2.0, 1.0]).is_empty());
        assert!(find_peaks(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_protocol_distribution() {
        let mut packets: Vec<PacketRecord> = (0..4)
            .map(|i| PacketRecord::bare(i, i as f64 * 0.5, 100))
            .collect();
        packets[1].transport = Transport::Icmp;
        packets[1].src_ip = "10.0.0.1".into();

        let distribution = protocol_distribution(&PacketTimeline::new(packets));
        assert_eq!(distribution["Other"].count, 3);
        assert_eq!(distribution["Other"].bytes, 300);

        let latency = distribution["Other"].latency.as_ref().unwrap();
        assert_eq!(latency.count, 2);
        assert_eq!(latency.min_latency, 0.5);
        assert_eq!(latency.max_latency, 1.0);
        assert!((latency.total_delay - 1.5).abs() < 1e-12);

        assert_eq!(distribution["ICMP"].count, 1);
        assert!(distribution["ICMP"].latency.is_none());
    }

    #[test]
    fn test_packet_delays_request_response() {
        let tcp = |index: usize, ts: f64, src: &str, sport: u16, dst: &str, dport: u16| {
            let mut p = PacketRecord::bare(index, ts, 80);
            p.src_ip = src.into();
            p.dst_ip = dst.into();
            p.transport = Transport::Tcp(TcpSegment::new(sport, dport));
            p
        };
        let mut arp = PacketRecord::bare(4, 1.5, 42);
        arp.transport = Transport::Arp;
        let packets = vec![
            tcp(0, 1.0, "10.0.0.5", 40000, "10.0.0.1", 80),
            tcp(1, 1.25, "10.0.0.1", 80, "10.0.0.5", 40000),
            tcp(2, 1.3, "10.0.0.5", 40000, "10.0.0.1", 80),
            tcp(3, 1.4, "10.0.0.5", 40000, "10.0.0.1", 80),
            arp,
        ];

        let delays = packet_delays(&PacketTimeline::new(packets));
        assert_eq!(delays.len(), 5);
        assert_eq!(delays[0].delay, 0.0);
        assert!((delays[1].delay - 0.25).abs() < 1e-12);
        assert!((delays[2].delay - 0.05).abs() < 1e-12);
        // Still measured from the last reverse packet.
        assert!((delays[3].delay - 0.15).abs() < 1e-12);
        assert_eq!(delays[4].delay, 0.0);
        assert_eq!(delays[4].protocol, "ARP");
        assert_eq!(delays[1].src_port, Some(80));
        assert_eq!(delays[4].dst_port, None);
    }
}
