//! Traffic pattern and anomaly detection over per-flow delay series.
//!
//! # Patterns
//! - **Periodic**: σ < `periodic_max_cv`·μ with μ above a floor. The
//!   confidence is `1 − σ/μ`.
//! - **Bursty**: 2-means over the delays. A gap center well above the burst
//!   center, and a burst cluster that is neither tiny nor nearly all the
//!   samples, marks the flow as bursty.
//!
//! # Anomalies
//! - **Irregular delay**: dᵢ > μ + k·σ, reported with its z-score.
//! - **Jitter spike**: |dᵢ − dᵢ₋₁| above a multiple of the mean jitter.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::PatternConfig;
use crate::detectors::CongestionEvent;
use crate::flow::{Flow, FlowTable};
use crate::stats::{self, DelayStats};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodicPattern {
    pub flow: String,
    /// Mean delay in seconds.
    pub period: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstyPattern {
    pub flow: String,
    pub avg_burst_size: f64,
    /// Gap cluster center in seconds.
    pub avg_gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrregularDelay {
    pub flow: String,
    /// Index of the packet that closed the delay.
    pub packet_index: usize,
    pub delay: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JitterSpike {
    pub flow: String,
    pub packet_index: usize,
    pub jitter: f64,
    pub ratio_to_mean: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Patterns {
    pub periodic: Vec<PeriodicPattern>,
    pub bursty: Vec<BurstyPattern>,
    pub congestion_events: Vec<CongestionEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Anomalies {
    pub irregular_delays: Vec<IrregularDelay>,
    pub jitter_spikes: Vec<JitterSpike>,
}

impl Anomalies {
    pub fn total(&self) -> usize {
        self.irregular_delays.len() + self.jitter_spikes.len()
    }
}

/// Everything found in one flow.
#[derive(Debug, Default)]
struct FlowFindings {
    periodic: Option<PeriodicPattern>,
    bursty: Option<BurstyPattern>,
    irregular: Vec<IrregularDelay>,
    spikes: Vec<JitterSpike>,
}

pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Runs pattern and anomaly detection over every flow with delays.
    /// `congestion_events` are not recomputed here; the caller fills them
    /// from the congestion detector.
    pub fn detect(&self, flows: &FlowTable<'_>) -> (Patterns, Anomalies) {
        let analyzable: Vec<&Flow<'_>> = flows.analyzable().collect();
        let findings: Vec<FlowFindings> = analyzable
            .par_iter()
            .map(|flow| self.detect_flow(flow))
            .collect();

        let mut patterns = Patterns::default();
        let mut anomalies = Anomalies::default();
        for found in findings {
            patterns.periodic.extend(found.periodic);
            patterns.bursty.extend(found.bursty);
            anomalies.irregular_delays.extend(found.irregular);
            anomalies.jitter_spikes.extend(found.spikes);
        }

        debug!(
            "Patterns: {} flows, {} periodic, {} bursty, {} irregular delays, {} jitter spikes",
            analyzable.len(),
            patterns.periodic.len(),
            patterns.bursty.len(),
            anomalies.irregular_delays.len(),
            anomalies.jitter_spikes.len()
        );
        (patterns, anomalies)
    }

    fn detect_flow(&self, flow: &Flow<'_>) -> FlowFindings {
        let delays = flow.delays();
        let summary = DelayStats::from_samples(&delays);

        FlowFindings {
            periodic: self.periodic(flow, &delays, &summary),
            bursty: self.bursty(flow, &delays),
            irregular: self.irregular(flow, &delays, &summary),
            spikes: self.jitter_spikes(flow, &delays),
        }
    }

    fn periodic(&self, flow: &Flow<'_>, delays: &[f64], summary: &DelayStats) -> Option<PeriodicPattern> {
        let cfg = &self.config;
        if delays.len() <= cfg.periodic_min_delays {
            return None;
        }
        if summary.std_dev < cfg.periodic_max_cv * summary.mean
            && summary.mean > cfg.periodic_min_period_secs
        {
            Some(PeriodicPattern {
                flow: flow.name.clone(),
                period: summary.mean,
                confidence: 1.0 - summary.std_dev / summary.mean,
            })
        } else {
            None
        }
    }

    fn bursty(&self, flow: &Flow<'_>, delays: &[f64]) -> Option<BurstyPattern> {
        let cfg = &self.config;
        if delays.len() <= cfg.burst_min_delays {
            return None;
        }

        let fit = cfg.kmeans.fit(delays)?;
        let low = fit.lowest();
        let high = fit.highest();
        if fit.centers[high] <= cfg.burst_gap_ratio * fit.centers[low] {
            return None;
        }

        let burst_count = fit.size(low);
        if burst_count > cfg.burst_margin && burst_count + cfg.burst_margin < delays.len() {
            Some(BurstyPattern {
                flow: flow.name.clone(),
                avg_burst_size: burst_count as f64 / (fit.size(high) + 1) as f64,
                avg_gap: fit.centers[high],
            })
        } else {
            None
        }
    }

    fn irregular(&self, flow: &Flow<'_>, delays: &[f64], summary: &DelayStats) -> Vec<IrregularDelay> {
        let cfg = &self.config;
        if delays.len() <= cfg.irregular_min_delays || summary.std_dev <= 0.0 {
            return Vec::new();
        }

        let threshold = summary.mean + cfg.irregular_sigma * summary.std_dev;
        delays
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > threshold)
            .map(|(i, &d)| IrregularDelay {
                flow: flow.name.clone(),
                packet_index: flow.packets[i + 1].index,
                delay: d,
                z_score: (d - summary.mean) / summary.std_dev,
            })
            .collect()
    }

    fn jitter_spikes(&self, flow: &Flow<'_>, delays: &[f64]) -> Vec<JitterSpike> {
        let cfg = &self.config;
        if delays.len() <= cfg.spike_min_delays {
            return Vec::new();
        }

        let jitter = stats::abs_diffs(delays);
        let mean_jitter = stats::mean(&jitter);
        if mean_jitter <= 0.0 {
            return Vec::new();
        }

        // jitter[i] compares delays i and i + 1; the spike is reported at
        // the packet that opens delay i + 1.
        jitter
            .iter()
            .enumerate()
            .filter(|(_, &j)| j > cfg.spike_ratio * mean_jitter && j > cfg.spike_min_secs)
            .map(|(i, &j)| JitterSpike {
                flow: flow.name.clone(),
                packet_index: flow.packets[i + 1].index,
                jitter: j,
                ratio_to_mean: j / mean_jitter,
            })
            .collect()
    }
}
