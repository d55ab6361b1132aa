//! Per-flow jitter: mean absolute change between consecutive delays.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::{DelayDetector, DelayEvent, DetectorInput, DetectorOutput};
use crate::config::JitterConfig;
use crate::flow::Flow;
use crate::stats;

const NAME: &str = "jitter";

/// Jitter needs at least this many delay differences.
const MIN_JITTER_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JitterEvent {
    pub flow: String,
    pub mean_jitter: f64,
    pub max_jitter: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub packet_count: usize,
}

pub struct JitterDetector {
    config: JitterConfig,
}

impl JitterDetector {
    pub fn new(config: JitterConfig) -> Self {
        Self { config }
    }

    fn detect_flow(&self, flow: &Flow<'_>) -> Option<DelayEvent> {
        let jitter = stats::abs_diffs(&flow.delays());
        if jitter.len() < MIN_JITTER_SAMPLES {
            return None;
        }

        let mean_jitter = stats::mean(&jitter);
        if mean_jitter <= self.config.threshold_secs {
            return None;
        }

        Some(DelayEvent::Jitter(JitterEvent {
            flow: flow.name.clone(),
            mean_jitter,
            max_jitter: stats::max(&jitter),
            start_time: flow.first_seen(),
            end_time: flow.last_seen(),
            packet_count: flow.len(),
        }))
    }
}

impl DelayDetector for JitterDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput {
        let flows: Vec<&Flow<'_>> = input
            .flows
            .iter()
            .filter(|f| f.len() >= self.config.min_flow_packets)
            .collect();
        if flows.is_empty() {
            return DetectorOutput::skipped(
                NAME,
                format!("no flow with {} or more packets", self.config.min_flow_packets),
            );
        }

        let events: Vec<DelayEvent> = flows
            .par_iter()
            .filter_map(|flow| self.detect_flow(flow))
            .collect();

        debug!(
            "Jitter: {} flows examined, {} events",
            flows.len(),
            events.len()
        );
        DetectorOutput::ran(NAME, flows.len(), events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::PacketTimeline;
    use crate::detectors::test_support::tcp;
    use crate::flow::FlowTable;
    use crate::packet::PacketRecord;

    fn run(timestamps: &[f64]) -> DetectorOutput {
        let packets: Vec<PacketRecord> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| tcp(i, ts, "10.0.0.1", 40000, "10.0.0.2", 80))
            .collect();
        let timeline = PacketTimeline::new(packets);
        let flows = FlowTable::reconstruct(timeline.packets());
        JitterDetector::new(JitterConfig::default()).detect(&DetectorInput {
            timeline: &timeline,
            flows: &flows,
        })
    }

    #[test]
    fn test_constant_spacing_has_no_jitter() {
        let timestamps: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let output = run(&timestamps);
        assert!(output.stats.ran);
        assert_eq!(output.stats.examined, 1);
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_alternating_spacing_is_jitter() {
        // Delays alternate 0.01 / 0.1, so every change is 0.09.
        let mut ts = 0.0;
        let mut timestamps = vec![ts];
        for i in 0..10 {
            ts += if i % 2 == 0 { 0.01 } else { 0.1 };
            timestamps.push(ts);
        }

        let output = run(&timestamps);
        assert_eq!(output.events.len(), 1);
        let DelayEvent::Jitter(event) = &output.events[0] else {
            panic!("expected a jitter event");
        };
        assert!((event.mean_jitter - 0.09).abs() < 1e-9);
        assert!((event.max_jitter - 0.09).abs() < 1e-9);
        assert_eq!(event.packet_count, 11);
        assert_eq!(event.start_time, 0.0);
    }

    #[test]
    fn test_short_flows_are_skipped() {
        let output = run(&[0.0, 0.5, 0.6, 2.0]);
        assert!(!output.stats.ran);
        assert!(output.events.is_empty());
    }
}
