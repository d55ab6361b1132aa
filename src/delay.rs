//! Delay computation.
//!
//! For timestamps [t₀, t₁, …, tₙ] sorted ascending, the global delay series
//! is [0, t₁ − t₀, …, tₙ − tₙ₋₁]: one sample per packet, the first fixed at
//! zero. Per-flow series are computed the same way over a flow's own
//! timestamps without the leading zero (see [`crate::flow::Flow::delays`]).

use crate::error::AnalyzerError;
use crate::packet::PacketRecord;
use crate::stats;

/// Minimum number of timestamps needed to compute any delay.
pub const MIN_TIMESTAMPS: usize = 2;

/// The capture's packets in timestamp order with their global delays.
#[derive(Debug, Clone)]
pub struct PacketTimeline {
    packets: Vec<PacketRecord>,
    delays: Vec<f64>,
}

impl PacketTimeline {
    /// Sorts packets by `(timestamp, index)` and derives the global delay
    /// series. Ties on timestamp keep the normalizer's ordinal order, so the
    /// result does not depend on the input order.
    pub fn new(mut packets: Vec<PacketRecord>) -> Self {
        packets.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut delays = Vec::with_capacity(packets.len());
        if !packets.is_empty() {
            delays.push(0.0);
        }
        delays.extend(
            packets
                .windows(2)
                .map(|pair| pair[1].timestamp - pair[0].timestamp),
        );

        Self { packets, delays }
    }

    /// Like [`PacketTimeline::new`], but fails on captures too small to
    /// yield a single delay.
    pub fn try_new(packets: Vec<PacketRecord>) -> Result<Self, AnalyzerError> {
        if packets.len() < MIN_TIMESTAMPS {
            return Err(AnalyzerError::DegenerateInput {
                required: MIN_TIMESTAMPS,
                actual: packets.len(),
            });
        }
        Ok(Self::new(packets))
    }

    pub fn packets(&self) -> &[PacketRecord] {
        &self.packets
    }

    /// Global delay series, aligned with [`PacketTimeline::packets`].
    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    /// Global delays without the leading zero sample.
    pub fn inter_packet_delays(&self) -> &[f64] {
        self.delays.get(1..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn start_time(&self) -> f64 {
        self.packets.first().map(|p| p.timestamp).unwrap_or(0.0)
    }

    pub fn end_time(&self) -> f64 {
        self.packets.last().map(|p| p.timestamp).unwrap_or(0.0)
    }

    /// Mean time between consecutive packets.
    pub fn average_latency(&self) -> f64 {
        stats::mean(self.inter_packet_delays())
    }

    /// Positions of the packets whose timestamp lies in `[start, end]`.
    pub fn range(&self, start: f64, end: f64) -> std::ops::Range<usize> {
        let lo = self.packets.partition_point(|p| p.timestamp < start);
        let hi = self.packets.partition_point(|p| p.timestamp <= end);
        lo..hi.max(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(timestamps: &[f64]) -> PacketTimeline {
        let packets = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| PacketRecord::bare(i, ts, 60))
            .collect();
        PacketTimeline::new(packets)
    }

    #[test]
    fn test_global_delays_start_at_zero() {
        let tl = timeline(&[1.0, 1.5, 3.0]);
        assert_eq!(tl.delays(), &[0.0, 0.5, 1.5]);
        assert_eq!(tl.inter_packet_delays(), &[0.5, 1.5]);
        assert!((tl.average_latency() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sorts_unordered_input() {
        let tl = timeline(&[3.0, 1.0, 2.0]);
        let order: Vec<usize> = tl.packets().iter().map(|p| p.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(tl.delays(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_ties_broken_by_index() {
        let packets = vec![
            PacketRecord::bare(5, 1.0, 60),
            PacketRecord::bare(2, 1.0, 60),
        ];
        let tl = PacketTimeline::new(packets);
        assert_eq!(tl.packets()[0].index, 2);
    }

    #[test]
    fn test_degenerate_input() {
        let err = PacketTimeline::try_new(vec![PacketRecord::bare(0, 1.0, 60)]).unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::DegenerateInput {
                required: 2,
                actual: 1
            }
        ));
        assert!(PacketTimeline::try_new(Vec::new()).is_err());
    }

    #[test]
    fn test_empty_timeline() {
        let tl = PacketTimeline::new(Vec::new());
        assert!(tl.delays().is_empty());
        assert!(tl.inter_packet_delays().is_empty());
        assert_eq!(tl.average_latency(), 0.0);
    }

    #[test]
    fn test_range_is_inclusive() {
        let tl = timeline(&[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(tl.range(1.0, 2.0), 1..3);
        assert_eq!(tl.range(5.0, 6.0), 4..4);
    }
}
