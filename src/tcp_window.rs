//! TCP receive-window analysis.
//!
//! A zero advertised window means the receiver's buffer is full, a direct
//! congestion signal. Large swings in a host's advertised window point the
//! same way, so per-host variation (σ/μ) is reported too.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::packet::{PacketRecord, UNKNOWN_ADDR};
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZeroWindowEvent {
    pub packet_index: usize,
    pub time: f64,
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub min: u16,
    pub max: u16,
    pub mean: f64,
    /// Population standard deviation over the mean, 0 for all-zero windows.
    pub variation: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowIndicators {
    pub zero_window_count: usize,
    /// Mean per-host variation.
    pub window_size_variation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TcpWindowAnalysis {
    /// Keyed by source endpoint (`ip:port`).
    pub window_size_analysis: BTreeMap<String, WindowStats>,
    pub zero_window_events: Vec<ZeroWindowEvent>,
    /// `WScale` option values keyed by connection (`src-dst`).
    pub window_scale_factors: BTreeMap<String, String>,
    pub congestion_indicators: WindowIndicators,
}

fn endpoint(ip: &str, port: u16) -> String {
    if ip == UNKNOWN_ADDR {
        format!("unknown:{}", port)
    } else {
        format!("{}:{}", ip, port)
    }
}

/// Analyzes every TCP segment in `packets`, in the order given.
pub fn analyze(packets: &[PacketRecord]) -> TcpWindowAnalysis {
    let mut windows: BTreeMap<String, Vec<u16>> = BTreeMap::new();
    let mut zero_window_events = Vec::new();
    let mut window_scale_factors = BTreeMap::new();
    let mut segments = 0;

    for packet in packets {
        let Some(seg) = packet.tcp() else {
            continue;
        };
        segments += 1;

        let src = endpoint(&packet.src_ip, seg.src_port);
        if let Some(window) = seg.window {
            if window == 0 {
                zero_window_events.push(ZeroWindowEvent {
                    packet_index: packet.index,
                    time: packet.timestamp,
                    src: src.clone(),
                });
            }
            windows.entry(src.clone()).or_default().push(window);
        }

        if let Some(scale) = seg.option("WScale") {
            let connection = format!("{}-{}", src, endpoint(&packet.dst_ip, seg.dst_port));
            window_scale_factors.insert(connection, scale.to_string());
        }
    }

    let window_size_analysis: BTreeMap<String, WindowStats> = windows
        .into_iter()
        .map(|(host, sizes)| (host, window_stats(&sizes)))
        .collect();

    let variations: Vec<f64> = window_size_analysis.values().map(|w| w.variation).collect();
    let congestion_indicators = WindowIndicators {
        zero_window_count: zero_window_events.len(),
        window_size_variation: stats::mean(&variations),
    };

    debug!(
        "TCP window: {} segments, {} hosts, {} zero-window events",
        segments,
        window_size_analysis.len(),
        zero_window_events.len()
    );

    TcpWindowAnalysis {
        window_size_analysis,
        zero_window_events,
        window_scale_factors,
        congestion_indicators,
    }
}

fn window_stats(sizes: &[u16]) -> WindowStats {
    let values: Vec<f64> = sizes.iter().map(|&w| w as f64).collect();
    let mean = stats::mean(&values);
    let variation = if mean > 0.0 {
        stats::std_dev(&values) / mean
    } else {
        0.0
    };
    WindowStats {
        min: sizes.iter().copied().min().unwrap_or(0),
        max: sizes.iter().copied().max().unwrap_or(0),
        mean,
        variation,
        samples: sizes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TcpOption, TcpSegment, Transport};

    fn segment(index: usize, src: &str, sport: u16, window: Option<u16>) -> PacketRecord {
        let mut seg = TcpSegment::new(sport, 443);
        seg.window = window;
        PacketRecord {
            index,
            timestamp: index as f64 * 0.1,
            size: 60,
            src_ip: src.into(),
            dst_ip: "10.0.0.9".into(),
            transport: Transport::Tcp(seg),
            app: None,
        }
    }

    #[test]
    fn test_zero_window_events() {
        let packets = vec![
            segment(0, "10.0.0.1", 40000, Some(65535)),
            segment(1, "10.0.0.1", 40000, Some(0)),
            segment(2, "10.0.0.1", 40000, Some(32768)),
        ];
        let analysis = analyze(&packets);

        assert_eq!(analysis.zero_window_events.len(), 1);
        assert_eq!(analysis.zero_window_events[0].packet_index, 1);
        assert_eq!(analysis.zero_window_events[0].src, "10.0.0.1:40000");
        assert_eq!(analysis.congestion_indicators.zero_window_count, 1);

        let host = &analysis.window_size_analysis["10.0.0.1:40000"];
        assert_eq!(host.min, 0);
        assert_eq!(host.max, 65535);
        assert_eq!(host.samples, 3);
        assert!(host.variation > 0.0);
    }

    #[test]
    fn test_constant_window_has_no_variation() {
        let packets: Vec<PacketRecord> = (0..4)
            .map(|i| segment(i, "10.0.0.1", 40000, Some(1024)))
            .chain((4..6).map(|i| segment(i, "10.0.0.2", 40001, Some(0))))
            .collect();
        let analysis = analyze(&packets);

        assert_eq!(analysis.window_size_analysis.len(), 2);
        assert_eq!(analysis.window_size_analysis["10.0.0.1:40000"].variation, 0.0);
        // An all-zero host divides by a zero mean.
        assert_eq!(analysis.window_size_analysis["10.0.0.2:40001"].variation, 0.0);
        assert_eq!(analysis.congestion_indicators.window_size_variation, 0.0);
    }

    #[test]
    fn test_window_scale_per_connection() {
        let mut syn = segment(0, "10.0.0.1", 40000, Some(64240));
        if let Transport::Tcp(seg) = &mut syn.transport {
            seg.options.push(TcpOption::new("MSS", "1460"));
            seg.options.push(TcpOption::new("WScale", "7"));
        }
        let analysis = analyze(&[syn, segment(1, "10.0.0.1", 40000, None)]);

        assert_eq!(
            analysis.window_scale_factors.get("10.0.0.1:40000-10.0.0.9:443"),
            Some(&"7".to_string())
        );
        assert_eq!(analysis.window_size_analysis["10.0.0.1:40000"].samples, 1);
    }

    #[test]
    fn test_non_tcp_is_ignored() {
        let analysis = analyze(&[PacketRecord::bare(0, 0.0, 42)]);
        assert_eq!(analysis, TcpWindowAnalysis::default());
    }
}
