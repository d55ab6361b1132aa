//! The analysis result handed to storage and transport collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delay::PacketTimeline;
use crate::detectors::{DelayCategories, DetectorStats};
use crate::flow::FlowTable;
use crate::patterns::{Anomalies, Patterns};
use crate::root_cause::{RootCauseAnalysis, RootCauseSummary};
use crate::scoring::{CongestionLevel, CongestionMetrics};
use crate::stats::DelayStats;
use crate::tcp_window::TcpWindowAnalysis;
use crate::traffic_stats::{PacketDelay, ProtocolStats, TrafficStatistics};

/// Everything one analysis run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub generated_at: DateTime<Utc>,
    pub summary: CaptureSummary,
    /// Mean global inter-packet delay in seconds.
    pub average_latency: f64,
    pub delay_categories: DelayCategories,
    pub patterns: Patterns,
    pub anomalies: Anomalies,
    pub root_cause_analysis: RootCauseAnalysis,
    pub root_cause_summary: RootCauseSummary,
    pub congestion_metrics: CongestionMetrics,
    pub congestion_score: f64,
    pub congestion_level: CongestionLevel,
    /// Omitted for captures too short for capture-wide statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<TrafficStatistics>,
    pub protocol_distribution: BTreeMap<String, ProtocolStats>,
    /// Every packet with its request/response delay, in time order.
    pub packet_delays: Vec<PacketDelay>,
    pub tcp_window_analysis: TcpWindowAnalysis,
    pub detector_stats: Vec<DetectorStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Global delay summary, including the leading zero sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelaySummary {
    pub average: f64,
    pub median: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryCounts {
    pub bundling_delays: usize,
    pub broker_processing_delays: usize,
    pub retransmission_delays: usize,
    pub network_congestion_events: usize,
    pub jitter_flows: usize,
}

impl From<&DelayCategories> for CategoryCounts {
    fn from(categories: &DelayCategories) -> Self {
        Self {
            bundling_delays: categories.bundling_delay.len(),
            broker_processing_delays: categories.broker_processing_delay.len(),
            retransmission_delays: categories.retransmission_delay.len(),
            network_congestion_events: categories.network_congestion.len(),
            jitter_flows: categories.jitter.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BrokerTraffic {
    pub packets: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSummary {
    pub packet_count: usize,
    /// All flows, including single-packet ones.
    pub flow_count: usize,
    /// Flows with at least two packets.
    pub analyzed_flow_count: usize,
    pub time_span: TimeSpan,
    pub delays: DelaySummary,
    pub delay_categories: CategoryCounts,
    pub broker_traffic: BrokerTraffic,
    /// Packet count per protocol label.
    pub protocols: BTreeMap<String, usize>,
}

impl CaptureSummary {
    pub fn new(
        timeline: &PacketTimeline,
        flows: &FlowTable<'_>,
        categories: &DelayCategories,
        broker_ports: &[u16],
    ) -> Self {
        let packet_count = timeline.len();
        let delays = DelayStats::from_samples(timeline.delays());

        let broker_packets = timeline
            .packets()
            .iter()
            .filter(|p| p.touches_port(broker_ports))
            .count();

        let mut protocols = BTreeMap::new();
        for packet in timeline.packets() {
            *protocols
                .entry(packet.protocol_label().to_string())
                .or_insert(0) += 1;
        }

        Self {
            packet_count,
            flow_count: flows.len(),
            analyzed_flow_count: flows.analyzable_count(),
            time_span: TimeSpan {
                start: timeline.start_time(),
                end: timeline.end_time(),
                duration: timeline.end_time() - timeline.start_time(),
            },
            delays: DelaySummary {
                average: delays.mean,
                median: delays.median,
                max: delays.max,
                std_dev: delays.std_dev,
            },
            delay_categories: CategoryCounts::from(categories),
            broker_traffic: BrokerTraffic {
                packets: broker_packets,
                percentage: if packet_count > 0 {
                    broker_packets as f64 / packet_count as f64 * 100.0
                } else {
                    0.0
                },
            },
            protocols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketRecord, TcpSegment, Transport};

    #[test]
    fn test_capture_summary() {
        let mut packets: Vec<PacketRecord> = (0..4)
            .map(|i| PacketRecord::bare(i, 1.0 + i as f64, 60))
            .collect();
        packets[0].src_ip = "10.0.0.5".into();
        packets[0].dst_ip = "10.0.0.1".into();
        packets[0].transport = Transport::Tcp(TcpSegment::new(40000, 1883));

        let timeline = PacketTimeline::new(packets);
        let flows = FlowTable::reconstruct(timeline.packets());
        let summary = CaptureSummary::new(&timeline, &flows, &DelayCategories::default(), &[1883]);

        assert_eq!(summary.packet_count, 4);
        // One TCP flow plus three synthetic single-packet flows.
        assert_eq!(summary.flow_count, 4);
        assert_eq!(summary.analyzed_flow_count, 0);
        assert_eq!(summary.time_span.duration, 3.0);
        // Delays [0, 1, 1, 1].
        assert!((summary.delays.average - 0.75).abs() < 1e-12);
        assert_eq!(summary.delays.max, 1.0);
        assert_eq!(summary.broker_traffic.packets, 1);
        assert!((summary.broker_traffic.percentage - 25.0).abs() < 1e-12);
        assert_eq!(summary.protocols["TCP"], 1);
        assert_eq!(summary.protocols["Other"], 3);
        assert_eq!(summary.delay_categories, CategoryCounts::default());
    }
}
