//! Bundling delay: runs of small packets from one source, sent close
//! together, that were likely held back and flushed as a batch.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::{DelayDetector, DelayEvent, DetectorInput, DetectorOutput};
use crate::clustering::Dbscan;
use crate::config::BundlingConfig;
use crate::packet::{PacketRecord, Transport};
use crate::stats;

const NAME: &str = "bundling";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundlingEvent {
    pub src_ip: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub packet_count: usize,
    pub avg_size: f64,
}

pub struct BundlingDetector {
    config: BundlingConfig,
    clustering: Dbscan,
}

impl BundlingDetector {
    pub fn new(config: BundlingConfig, clustering: Dbscan) -> Self {
        Self { config, clustering }
    }

    fn detect_source(&self, src_ip: &str, packets: &[&PacketRecord]) -> Vec<DelayEvent> {
        if packets.len() < self.config.min_source_packets {
            return Vec::new();
        }

        let sizes: Vec<f64> = packets.iter().map(|p| p.size as f64).collect();
        let limit = stats::median(&sizes) * self.config.small_packet_ratio;

        // (packet, time since the previous packet from this source)
        let small: Vec<(&PacketRecord, f64)> = packets
            .iter()
            .enumerate()
            .filter(|(_, p)| (p.size as f64) < limit)
            .map(|(i, p)| {
                let gap = if i == 0 {
                    0.0
                } else {
                    p.timestamp - packets[i - 1].timestamp
                };
                (*p, gap)
            })
            .collect();

        if small.len() < self.config.min_small_packets {
            return Vec::new();
        }

        let gaps: Vec<f64> = small.iter().map(|(_, gap)| *gap).collect();
        let spread = stats::std_dev(&gaps);
        let points: Vec<[f64; 2]> = small
            .iter()
            .map(|(p, gap)| {
                let y = if spread > 0.0 {
                    gap / spread * self.config.time_scale
                } else {
                    *gap
                };
                [p.timestamp, y]
            })
            .collect();

        let labels = self.clustering.fit(&points);
        Dbscan::groups(&labels)
            .into_iter()
            .filter(|members| members.len() >= self.config.min_cluster_points)
            .filter_map(|members| {
                let times: Vec<f64> = members.iter().map(|&m| small[m].0.timestamp).collect();
                let start_time = stats::min(&times);
                let end_time = stats::max(&times);
                let duration = end_time - start_time;
                if duration <= self.config.min_duration_secs {
                    return None;
                }

                let cluster_sizes: Vec<f64> =
                    members.iter().map(|&m| small[m].0.size as f64).collect();
                Some(DelayEvent::Bundling(BundlingEvent {
                    src_ip: src_ip.to_string(),
                    start_time,
                    end_time,
                    duration,
                    packet_count: members.len(),
                    avg_size: stats::mean(&cluster_sizes),
                }))
            })
            .collect()
    }
}

impl DelayDetector for BundlingDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput {
        let packets = input.timeline.packets();
        if packets.len() < self.config.min_capture_packets {
            return DetectorOutput::skipped(
                NAME,
                format!(
                    "need at least {} packets, got {}",
                    self.config.min_capture_packets,
                    packets.len()
                ),
            );
        }

        let mut by_source: BTreeMap<&str, Vec<&PacketRecord>> = BTreeMap::new();
        for packet in packets
            .iter()
            .filter(|p| p.has_ip() && !matches!(p.transport, Transport::Arp))
        {
            by_source.entry(packet.src_ip.as_str()).or_default().push(packet);
        }

        let sources: Vec<(&str, Vec<&PacketRecord>)> = by_source.into_iter().collect();
        let events: Vec<DelayEvent> = sources
            .par_iter()
            .map(|(src_ip, packets)| self.detect_source(src_ip, packets))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Bundling: {} sources examined, {} events",
            sources.len(),
            events.len()
        );
        DetectorOutput::ran(NAME, sources.len(), events)
    }
}
