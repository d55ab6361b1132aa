//! Network congestion: stretches of the capture where the global delay
//! series becomes unusually volatile across several flows at once.
//!
//! 1. Rolling standard deviation of the global delays over an adaptive
//!    trailing window, `w = min(max_window, n / 5 + 1)`.
//! 2. Positions whose deviation exceeds `std_multiplier` times the mean of
//!    all nonzero deviations are flagged.
//! 3. Flagged timestamps are density-clustered; each cluster span (plus
//!    optional padding) is checked for multi-flow impact and a mean delay
//!    above `increase_factor` times the capture mean.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use super::{DelayDetector, DelayEvent, DetectorInput, DetectorOutput};
use crate::clustering::Dbscan;
use crate::config::CongestionConfig;
use crate::flow::FlowKey;
use crate::stats;

const NAME: &str = "congestion";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CongestionEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub flows_affected: usize,
    pub avg_delay: f64,
    pub max_delay: f64,
    pub delay_increase_factor: f64,
}

pub struct CongestionDetector {
    config: CongestionConfig,
    clustering: Dbscan,
}

impl CongestionDetector {
    pub fn new(config: CongestionConfig, clustering: Dbscan) -> Self {
        Self { config, clustering }
    }
}

impl DelayDetector for CongestionDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput {
        let timeline = input.timeline;
        let n = timeline.len();
        if n < self.config.min_packets {
            return DetectorOutput::skipped(
                NAME,
                format!("need at least {} packets, got {}", self.config.min_packets, n),
            );
        }

        let delays = timeline.delays();
        let packets = timeline.packets();
        let window = self.config.max_window.min(n / 5 + 1);
        let (_, deviations) = stats::rolling_mean_std(delays, window);

        let nonzero: Vec<f64> = deviations.iter().copied().filter(|&s| s > 0.0).collect();
        let baseline = stats::mean(&nonzero);
        let flagged: Vec<usize> = deviations
            .iter()
            .enumerate()
            .filter(|(_, &s)| s > 0.0 && s > baseline * self.config.std_multiplier)
            .map(|(i, _)| i)
            .collect();

        if flagged.len() < 2 {
            debug!("Congestion: {} volatile positions, nothing to cluster", flagged.len());
            return DetectorOutput::ran(NAME, 0, Vec::new());
        }

        let flagged_times: Vec<f64> = flagged.iter().map(|&i| packets[i].timestamp).collect();
        let groups = Dbscan::groups(&self.clustering.fit_1d(&flagged_times));
        let overall_mean = stats::mean(delays);

        let mut events = Vec::new();
        for members in &groups {
            let times: Vec<f64> = members.iter().map(|&m| flagged_times[m]).collect();
            let start_time = stats::min(&times) - self.config.window_padding_secs;
            let end_time = stats::max(&times) + self.config.window_padding_secs;

            let span = timeline.range(start_time, end_time);
            let flows_affected = packets[span.clone()]
                .iter()
                .map(FlowKey::for_record)
                .collect::<BTreeSet<_>>()
                .len();
            if flows_affected < self.config.min_flows {
                continue;
            }

            let span_delays = &delays[span];
            let avg_delay = stats::mean(span_delays);
            let delay_increase_factor = if overall_mean > 0.0 {
                avg_delay / overall_mean
            } else {
                0.0
            };

            if delay_increase_factor > self.config.increase_factor {
                events.push(DelayEvent::Congestion(CongestionEvent {
                    start_time,
                    end_time,
                    duration: end_time - start_time,
                    flows_affected,
                    avg_delay,
                    max_delay: stats::max(span_delays),
                    delay_increase_factor,
                }));
            }
        }

        debug!(
            "Congestion: window {}, {} volatile positions in {} clusters, {} events",
            window,
            flagged.len(),
            groups.len(),
            events.len()
        );
        DetectorOutput::ran(NAME, groups.len(), events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::PacketTimeline;
    use crate::detectors::test_support::{indexed, tcp};
    use crate::flow::FlowTable;
    use crate::packet::PacketRecord;

    fn run(packets: Vec<PacketRecord>, config: CongestionConfig) -> DetectorOutput {
        let timeline = PacketTimeline::new(packets);
        let flows = FlowTable::reconstruct(timeline.packets());
        CongestionDetector::new(config, Dbscan::default()).detect(&DetectorInput {
            timeline: &timeline,
            flows: &flows,
        })
    }

    /// 20 packets at 10 ms spacing with a 200 ms gap in the middle, and a
    /// second flow sending twice inside the gap.
    fn gap_capture() -> Vec<PacketRecord> {
        let mut packets: Vec<PacketRecord> = (0..10)
            .map(|i| tcp(0, i as f64 * 0.01, "10.0.0.1", 40000, "10.0.0.2", 80))
            .chain((0..10).map(|i| tcp(0, 0.29 + i as f64 * 0.01, "10.0.0.1", 40000, "10.0.0.2", 80)))
            .collect();
        packets.push(tcp(0, 0.26, "10.0.0.3", 40001, "10.0.0.2", 80));
        packets.push(tcp(0, 0.27, "10.0.0.3", 40001, "10.0.0.2", 80));
        indexed(packets)
    }

    #[test]
    fn test_gap_with_second_flow_is_congestion() {
        let output = run(gap_capture(), CongestionConfig::default());
        assert!(output.stats.ran);
        assert_eq!(output.events.len(), 1);

        let DelayEvent::Congestion(event) = &output.events[0] else {
            panic!("expected a congestion event");
        };
        assert_eq!(event.flows_affected, 2);
        assert!(event.delay_increase_factor > 1.5);
        assert!((event.start_time - 0.26).abs() < 1e-9);
        assert!((event.end_time - 0.31).abs() < 1e-9);
        assert!((event.max_delay - 0.17).abs() < 1e-9);
        assert!((event.avg_delay - 0.044).abs() < 1e-9);
    }

    #[test]
    fn test_single_flow_is_not_congestion() {
        let packets: Vec<PacketRecord> = gap_capture()
            .into_iter()
            .filter(|p| p.src_ip == "10.0.0.1")
            .collect();
        assert!(run(indexed(packets), CongestionConfig::default()).events.is_empty());
    }

    #[test]
    fn test_steady_traffic_is_not_congestion() {
        let packets = (0..50)
            .map(|i| tcp(i, i as f64 * 0.01, "10.0.0.1", 40000, "10.0.0.2", 80))
            .collect();
        assert!(run(packets, CongestionConfig::default()).events.is_empty());
    }

    #[test]
    fn test_too_few_packets_is_skipped() {
        let packets = (0..9)
            .map(|i| tcp(i, i as f64, "10.0.0.1", 40000, "10.0.0.2", 80))
            .collect();
        let output = run(packets, CongestionConfig::default());
        assert!(!output.stats.ran);
        assert!(output.events.is_empty());
    }
}
