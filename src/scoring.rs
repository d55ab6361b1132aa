//! Congestion scoring.
//!
//! The score is a weighted sum of saturating sub-metrics, clamped to
//! `[0, 100]`:
//!
//! ```text
//! score = 50 · retransmission_rate
//!       + 25 · min(1, jitter_ms / 100)
//!       + 15 · min(1, jitter_spikes / 10)
//!       + 10 · min(1, bundling_events / 20)
//! ```
//!
//! Congestion events are reported alongside but carry no weight.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CongestionMetrics {
    /// Retransmissions per packet.
    pub retransmission_rate: f64,
    /// Population standard deviation of the global delays, in ms.
    pub jitter_ms: f64,
    pub jitter_spike_count: usize,
    pub bundling_event_count: usize,
    pub congestion_event_count: usize,
}

impl CongestionMetrics {
    /// Derives the sub-metrics from event counts. `delay_std_dev` is the
    /// standard deviation of the global inter-packet delays in seconds.
    pub fn compute(
        packet_count: usize,
        retransmissions: usize,
        delay_std_dev: f64,
        jitter_spike_count: usize,
        bundling_event_count: usize,
        congestion_event_count: usize,
    ) -> Self {
        let retransmission_rate = if packet_count > 0 {
            retransmissions as f64 / packet_count as f64
        } else {
            0.0
        };
        Self {
            retransmission_rate,
            jitter_ms: delay_std_dev * 1000.0,
            jitter_spike_count,
            bundling_event_count,
            congestion_event_count,
        }
    }

    pub fn score(&self) -> f64 {
        let score = 50.0 * self.retransmission_rate
            + 25.0 * (self.jitter_ms / 100.0).min(1.0)
            + 15.0 * (self.jitter_spike_count as f64 / 10.0).min(1.0)
            + 10.0 * (self.bundling_event_count as f64 / 20.0).min(1.0);
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 100.0)
    }

    pub fn level(&self) -> CongestionLevel {
        CongestionLevel::from_score(self.score())
    }
}

/// Ordinal congestion level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CongestionLevel {
    Low,
    Moderate,
    High,
    Severe,
}

impl CongestionLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s > 80.0 => Self::Severe,
            s if s > 60.0 => Self::High,
            s if s > 30.0 => Self::Moderate,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Moderate => write!(f, "Moderate"),
            Self::High => write!(f, "High"),
            Self::Severe => write!(f, "Severe"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(rate: f64, jitter_ms: f64, spikes: usize, bundling: usize) -> CongestionMetrics {
        CongestionMetrics {
            retransmission_rate: rate,
            jitter_ms,
            jitter_spike_count: spikes,
            bundling_event_count: bundling,
            congestion_event_count: 0,
        }
    }

    #[test]
    fn test_score_weights() {
        assert_eq!(metrics(0.0, 0.0, 0, 0).score(), 0.0);
        assert!((metrics(0.5, 0.0, 0, 0).score() - 25.0).abs() < 1e-9);
        assert!((metrics(0.0, 50.0, 0, 0).score() - 12.5).abs() < 1e-9);
        assert!((metrics(0.0, 0.0, 5, 0).score() - 7.5).abs() < 1e-9);
        assert!((metrics(0.0, 0.0, 0, 10).score() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_metrics() {
        let m = CongestionMetrics::compute(200, 10, 0.025, 3, 1, 2);
        assert!((m.retransmission_rate - 0.05).abs() < 1e-12);
        assert!((m.jitter_ms - 25.0).abs() < 1e-9);
        assert_eq!(m.congestion_event_count, 2);

        let empty = CongestionMetrics::compute(0, 0, 0.0, 0, 0, 0);
        assert_eq!(empty, CongestionMetrics::default());
        assert_eq!(empty.level(), CongestionLevel::Low);
    }

    #[test]
    fn test_score_saturates_and_clamps() {
        assert!((metrics(0.0, 1000.0, 100, 100).score() - 50.0).abs() < 1e-9);
        assert_eq!(metrics(3.0, 1000.0, 100, 100).score(), 100.0);
    }

    #[test]
    fn test_congestion_events_carry_no_weight() {
        let mut m = metrics(0.1, 10.0, 1, 1);
        let before = m.score();
        m.congestion_event_count = 50;
        assert_eq!(m.score(), before);
    }

    #[test]
    fn test_score_is_monotonic() {
        let base = metrics(0.1, 20.0, 2, 3);
        let mut previous = base.score();
        for step in 1..50 {
            let m = metrics(0.1 + step as f64 * 0.05, 20.0, 2, 3);
            assert!(m.score() >= previous);
            previous = m.score();
        }

        let mut previous = base.score();
        for jitter in (20..400).step_by(10) {
            let m = metrics(0.1, jitter as f64, 2, 3);
            assert!(m.score() >= previous);
            previous = m.score();
        }

        let mut previous = base.score();
        for spikes in 2..30 {
            let m = metrics(0.1, 20.0, spikes, 3);
            assert!(m.score() >= previous);
            previous = m.score();
        }

        let mut previous = base.score();
        for bundling in 3..40 {
            let m = metrics(0.1, 20.0, 2, bundling);
            assert!(m.score() >= previous);
            previous = m.score();
        }
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(CongestionLevel::from_score(0.0), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_score(30.0), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_score(30.1), CongestionLevel::Moderate);
        assert_eq!(CongestionLevel::from_score(60.0), CongestionLevel::Moderate);
        assert_eq!(CongestionLevel::from_score(60.5), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_score(80.0), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_score(81.0), CongestionLevel::Severe);
        assert!(CongestionLevel::Severe > CongestionLevel::Low);
    }
}
