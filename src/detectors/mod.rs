//! Delay categorization.
//!
//! Five independent detectors each look at the same read-only capture and
//! return their own event list plus run statistics:
//!
//! | Detector         | Input                         | Event                 |
//! |------------------|-------------------------------|-----------------------|
//! | bundling         | small packets per source IP   | [`BundlingEvent`]     |
//! | broker           | traffic to/from broker ports  | [`BrokerEvent`]       |
//! | retransmission   | TCP sequence numbers per flow | [`RetransmissionEvent`] |
//! | congestion       | global delay variance         | [`CongestionEvent`]   |
//! | jitter           | per-flow delay variation      | [`JitterEvent`]       |
//!
//! A detector that lacks data is recorded as skipped, never as an error.

mod broker;
mod bundling;
mod congestion;
mod jitter;
mod retransmission;

pub use broker::{BrokerDetector, BrokerEvent};
pub use bundling::{BundlingDetector, BundlingEvent};
pub use congestion::{CongestionDetector, CongestionEvent};
pub use jitter::{JitterDetector, JitterEvent};
pub use retransmission::{RetransmissionDetector, RetransmissionEvent};

use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::delay::PacketTimeline;
use crate::flow::FlowTable;

/// Read-only view of one capture shared by all detectors.
#[derive(Clone, Copy)]
pub struct DetectorInput<'a> {
    pub timeline: &'a PacketTimeline,
    pub flows: &'a FlowTable<'a>,
}

/// Trait for delay detectors.
/// Implementations must not share mutable state so they can run in parallel.
pub trait DelayDetector: Send + Sync {
    /// Stable name used in run statistics and logs.
    fn name(&self) -> &'static str;

    /// Examines the capture and returns the events found.
    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput;
}

/// The canonical detector set, one per delay category.
pub fn default_detectors(config: &AnalysisConfig) -> Vec<Box<dyn DelayDetector>> {
    vec![
        Box::new(BundlingDetector::new(config.bundling.clone(), config.clustering)),
        Box::new(BrokerDetector::new(config.broker.clone())),
        Box::new(RetransmissionDetector),
        Box::new(CongestionDetector::new(
            config.congestion.clone(),
            config.clustering,
        )),
        Box::new(JitterDetector::new(config.jitter.clone())),
    ]
}

/// Delay category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayCategory {
    Bundling,
    BrokerProcessing,
    Retransmission,
    NetworkCongestion,
    Jitter,
}

impl std::fmt::Display for DelayCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bundling => write!(f, "Bundling"),
            Self::BrokerProcessing => write!(f, "Broker processing"),
            Self::Retransmission => write!(f, "Retransmission"),
            Self::NetworkCongestion => write!(f, "Network congestion"),
            Self::Jitter => write!(f, "Jitter"),
        }
    }
}

/// One categorized delay event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DelayEvent {
    Bundling(BundlingEvent),
    Broker(BrokerEvent),
    Retransmission(RetransmissionEvent),
    Congestion(CongestionEvent),
    Jitter(JitterEvent),
}

impl DelayEvent {
    pub fn category(&self) -> DelayCategory {
        match self {
            Self::Bundling(_) => DelayCategory::Bundling,
            Self::Broker(_) => DelayCategory::BrokerProcessing,
            Self::Retransmission(_) => DelayCategory::Retransmission,
            Self::Congestion(_) => DelayCategory::NetworkCongestion,
            Self::Jitter(_) => DelayCategory::Jitter,
        }
    }

    pub fn start_time(&self) -> f64 {
        match self {
            Self::Bundling(e) => e.start_time,
            Self::Broker(e) => e.in_time,
            Self::Retransmission(e) => e.orig_time,
            Self::Congestion(e) => e.start_time,
            Self::Jitter(e) => e.start_time,
        }
    }

    pub fn end_time(&self) -> f64 {
        match self {
            Self::Bundling(e) => e.end_time,
            Self::Broker(e) => e.out_time,
            Self::Retransmission(e) => e.retrans_time,
            Self::Congestion(e) => e.end_time,
            Self::Jitter(e) => e.end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }
}

/// Per-detector run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStats {
    pub detector: &'static str,
    /// False when the detector's minimum input was not met.
    pub ran: bool,
    /// Units examined (flows, sources, brokers or windows).
    pub examined: usize,
    pub produced: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// What a detector returns.
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    pub stats: DetectorStats,
    pub events: Vec<DelayEvent>,
}

impl DetectorOutput {
    /// Creates an output for a detector that ran.
    pub fn ran(detector: &'static str, examined: usize, events: Vec<DelayEvent>) -> Self {
        Self {
            stats: DetectorStats {
                detector,
                ran: true,
                examined,
                produced: events.len(),
                skip_reason: None,
            },
            events,
        }
    }

    /// Creates an empty output for a detector without enough data.
    pub fn skipped(detector: &'static str, reason: impl Into<String>) -> Self {
        Self {
            stats: DetectorStats {
                detector,
                ran: false,
                examined: 0,
                produced: 0,
                skip_reason: Some(reason.into()),
            },
            events: Vec::new(),
        }
    }
}

/// Delay events grouped by category, each list in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DelayCategories {
    pub bundling_delay: Vec<BundlingEvent>,
    pub broker_processing_delay: Vec<BrokerEvent>,
    pub retransmission_delay: Vec<RetransmissionEvent>,
    pub network_congestion: Vec<CongestionEvent>,
    pub jitter: Vec<JitterEvent>,
}

impl DelayCategories {
    pub fn push(&mut self, event: DelayEvent) {
        match event {
            DelayEvent::Bundling(e) => self.bundling_delay.push(e),
            DelayEvent::Broker(e) => self.broker_processing_delay.push(e),
            DelayEvent::Retransmission(e) => self.retransmission_delay.push(e),
            DelayEvent::Congestion(e) => self.network_congestion.push(e),
            DelayEvent::Jitter(e) => self.jitter.push(e),
        }
    }

    pub fn total(&self) -> usize {
        self.bundling_delay.len()
            + self.broker_processing_delay.len()
            + self.retransmission_delay.len()
            + self.network_congestion.len()
            + self.jitter.len()
    }
}

impl FromIterator<DelayEvent> for DelayCategories {
    fn from_iter<I: IntoIterator<Item = DelayEvent>>(iter: I) -> Self {
        let mut categories = Self::default();
        for event in iter {
            categories.push(event);
        }
        categories
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::packet::{PacketRecord, TcpSegment, Transport};

    pub fn tcp(index: usize, ts: f64, src: &str, sport: u16, dst: &str, dport: u16) -> PacketRecord {
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

    pub fn udp(index: usize, ts: f64, src: &str, dst: &str, size: u32) -> PacketRecord {
        PacketRecord {
            index,
            timestamp: ts,
            size,
            src_ip: src.into(),
            dst_ip: dst.into(),
            transport: Transport::Udp {
                src_port: 5000,
                dst_port: 6000,
            },
            app: None,
        }
    }

    /// Renumbers records by position so fixtures can be built from pieces.
    pub fn indexed(mut packets: Vec<PacketRecord>) -> Vec<PacketRecord> {
        for (i, p) in packets.iter_mut().enumerate() {
            p.index = i;
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowTable;

    #[test]
    fn test_all_detectors_handle_empty_capture() {
        let timeline = PacketTimeline::new(Vec::new());
        let flows = FlowTable::reconstruct(timeline.packets());
        let input = DetectorInput {
            timeline: &timeline,
            flows: &flows,
        };

        for detector in default_detectors(&AnalysisConfig::default()) {
            let output = detector.detect(&input);
            assert!(output.events.is_empty(), "{} produced events", detector.name());
            assert_eq!(output.stats.produced, 0);
            assert_eq!(output.stats.detector, detector.name());
        }
    }

    #[test]
    fn test_categories_route_events() {
        let event = DelayEvent::Retransmission(RetransmissionEvent {
            flow: "a:1->b:2".into(),
            orig_time: 1.0,
            retrans_time: 1.5,
            delay: 0.5,
            seq_num: 7,
        });
        assert_eq!(event.category(), DelayCategory::Retransmission);
        assert!((event.duration() - 0.5).abs() < 1e-12);

        let categories: DelayCategories = vec![event].into_iter().collect();
        assert_eq!(categories.retransmission_delay.len(), 1);
        assert_eq!(categories.total(), 1);
    }

    #[test]
    fn test_skipped_output() {
        let output = DetectorOutput::skipped("jitter", "no flows");
        assert!(!output.stats.ran);
        assert_eq!(output.stats.skip_reason.as_deref(), Some("no flows"));
    }
}
