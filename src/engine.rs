//! Analysis engine.
//!
//! Runs every analysis stage over one capture and assembles the result.
//!
//! ```text
//!                        ┌─ delay detectors (×5) ─┐
//! records ─> timeline ─> ├─ patterns / anomalies  ├─> AnalysisResult
//!            flow table  ├─ root-cause correlator │
//!                        └─ TCP window, stats     ┘
//! ```
//!
//! The stages share the read-only timeline and flow table and run as
//! independent `rayon` tasks; their outputs are merged afterwards.

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::delay::PacketTimeline;
use crate::detectors::{default_detectors, DelayCategories, DetectorInput, DetectorOutput};
use crate::error::AnalyzerError;
use crate::flow::FlowTable;
use crate::packet::PacketRecord;
use crate::patterns::PatternDetector;
use crate::report::{AnalysisResult, CaptureSummary};
use crate::root_cause::RootCauseCorrelator;
use crate::scoring::CongestionMetrics;
use crate::stats;
use crate::tcp_window;
use crate::traffic_stats;

/// Analyzes one capture. Packet order does not matter.
pub fn analyze(
    packets: Vec<PacketRecord>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    config.validate()?;

    let timeline = PacketTimeline::try_new(packets)?;
    let flows = FlowTable::reconstruct(timeline.packets());
    let input = DetectorInput {
        timeline: &timeline,
        flows: &flows,
    };
    debug!(
        "Analyzing {} packets in {} flows",
        timeline.len(),
        flows.len()
    );

    let detectors = default_detectors(config);
    let pattern_detector = PatternDetector::new(config.patterns.clone());
    let correlator = RootCauseCorrelator::new(config.root_cause.clone());

    let (outputs, ((mut patterns, anomalies), ((root_cause, root_summary), (windows, traffic)))) =
        rayon::join(
            || {
                detectors
                    .par_iter()
                    .map(|d| d.detect(&input))
                    .collect::<Vec<DetectorOutput>>()
            },
            || {
                rayon::join(
                    || pattern_detector.detect(&flows),
                    || {
                        rayon::join(
                            || correlator.correlate(&flows),
                            || {
                                rayon::join(
                                    || tcp_window::analyze(timeline.packets()),
                                    || {
                                        (
                                            traffic_stats::statistics(&timeline),
                                            traffic_stats::protocol_distribution(&timeline),
                                            traffic_stats::packet_delays(&timeline),
                                        )
                                    },
                                )
                            },
                        )
                    },
                )
            },
        );
    let (statistics, distribution, packet_delays) = traffic;

    let mut detector_stats = Vec::with_capacity(outputs.len());
    let mut categories = DelayCategories::default();
    for output in outputs {
        detector_stats.push(output.stats);
        for event in output.events {
            categories.push(event);
        }
    }
    patterns.congestion_events = categories.network_congestion.clone();

    let congestion_metrics = CongestionMetrics::compute(
        timeline.len(),
        categories.retransmission_delay.len(),
        stats::std_dev(timeline.inter_packet_delays()),
        anomalies.jitter_spikes.len(),
        categories.bundling_delay.len(),
        categories.network_congestion.len(),
    );
    let congestion_score = congestion_metrics.score();
    let congestion_level = congestion_metrics.level();

    let summary = CaptureSummary::new(&timeline, &flows, &categories, &config.broker.ports);

    info!(
        "Analysis complete: {} packets, {} flows, {} delay events, {} anomalies, congestion {:.1} ({})",
        summary.packet_count,
        summary.flow_count,
        categories.total(),
        anomalies.total(),
        congestion_score,
        congestion_level
    );

    Ok(AnalysisResult {
        generated_at: Utc::now(),
        summary,
        average_latency: timeline.average_latency(),
        delay_categories: categories,
        patterns,
        anomalies,
        root_cause_analysis: root_cause,
        root_cause_summary: root_summary,
        congestion_metrics,
        congestion_score,
        congestion_level,
        statistics,
        protocol_distribution: distribution,
        packet_delays,
        tcp_window_analysis: windows,
        detector_stats,
    })
}
