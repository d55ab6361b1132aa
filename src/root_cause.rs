//! Root-cause correlation.
//!
//! Every intra-flow delay above a floor is an observation attributed to the
//! packet that closed it. Observations are bucketed by packet size range,
//! protocol, source IP, destination IP and port, and each dimension is
//! ranked by average delay. The highest-ranked size range, protocol and
//! host pair become the "likely causes".

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::RootCauseConfig;
use crate::flow::{Flow, FlowTable};
use crate::packet::PacketRecord;
use crate::stats::DelayStats;

/// Delay statistics of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseBucket {
    pub key: String,
    pub avg_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    pub count: usize,
    pub std_dev: f64,
}

impl RootCauseBucket {
    fn new(key: String, delays: &[f64]) -> Self {
        let summary = DelayStats::from_samples(delays);
        Self {
            key,
            avg_delay: summary.mean,
            min_delay: summary.min,
            max_delay: summary.max,
            count: summary.count,
            std_dev: summary.std_dev,
        }
    }
}

/// Ranked buckets per dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RootCauseAnalysis {
    pub by_size: Vec<RootCauseBucket>,
    pub by_protocol: Vec<RootCauseBucket>,
    #[serde(rename = "by_source")]
    pub by_src_ip: Vec<RootCauseBucket>,
    #[serde(rename = "by_destination")]
    pub by_dst_ip: Vec<RootCauseBucket>,
    pub by_port: Vec<RootCauseBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseFactor {
    PacketSize,
    Protocol,
    Path,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LikelyCause {
    pub factor: CauseFactor,
    pub key: String,
    pub avg_delay: f64,
    pub count: usize,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RootCauseSummary {
    /// Delay observations above the floor.
    pub observations: usize,
    pub likely_causes: Vec<LikelyCause>,
}

#[derive(Default)]
struct Buckets {
    size: BTreeMap<String, Vec<f64>>,
    protocol: BTreeMap<String, Vec<f64>>,
    src_ip: BTreeMap<String, Vec<f64>>,
    dst_ip: BTreeMap<String, Vec<f64>>,
    port: BTreeMap<String, Vec<f64>>,
    path: BTreeMap<String, Vec<f64>>,
}

pub struct RootCauseCorrelator {
    config: RootCauseConfig,
}

impl RootCauseCorrelator {
    pub fn new(config: RootCauseConfig) -> Self {
        Self { config }
    }

    pub fn correlate(&self, flows: &FlowTable<'_>) -> (RootCauseAnalysis, RootCauseSummary) {
        let analyzable: Vec<&Flow<'_>> = flows.analyzable().collect();
        let per_flow: Vec<Vec<(&PacketRecord, f64)>> = analyzable
            .par_iter()
            .map(|flow| self.observations(flow))
            .collect();

        let mut buckets = Buckets::default();
        let mut observations = 0;
        for (packet, delay) in per_flow.into_iter().flatten() {
            observations += 1;
            self.record(&mut buckets, packet, delay);
        }

        let min = self.config.min_endpoint_samples;
        let top = self.config.top_n;
        let analysis = RootCauseAnalysis {
            by_size: rank(&buckets.size, 0, usize::MAX),
            by_protocol: rank(&buckets.protocol, 0, usize::MAX),
            by_src_ip: rank(&buckets.src_ip, min, top),
            by_dst_ip: rank(&buckets.dst_ip, min, top),
            by_port: rank(&buckets.port, min, top),
        };
        let paths = rank(&buckets.path, min, 1);

        let mut likely_causes: Vec<LikelyCause> = [
            analysis.by_size.first().map(|b| cause(CauseFactor::PacketSize, b)),
            analysis.by_protocol.first().map(|b| cause(CauseFactor::Protocol, b)),
            paths.first().map(|b| cause(CauseFactor::Path, b)),
        ]
        .into_iter()
        .flatten()
        .collect();
        likely_causes.sort_by(|a, b| b.avg_delay.total_cmp(&a.avg_delay));

        debug!(
            "Root cause: {} observations over {} flows, {} likely causes",
            observations,
            analyzable.len(),
            likely_causes.len()
        );
        (
            analysis,
            RootCauseSummary {
                observations,
                likely_causes,
            },
        )
    }

    /// Delays above the floor, each paired with the packet that ended it.
    fn observations<'a>(&self, flow: &Flow<'a>) -> Vec<(&'a PacketRecord, f64)> {
        flow.packets
            .windows(2)
            .map(|pair| (pair[1], pair[1].timestamp - pair[0].timestamp))
            .filter(|(_, delay)| *delay > self.config.min_delay_secs)
            .collect()
    }

    fn record(&self, buckets: &mut Buckets, packet: &PacketRecord, delay: f64) {
        let width = u64::from(self.config.size_bucket_bytes.max(1));
        let lo = u64::from(packet.size) / width * width;
        let size_key = format!("{}-{}", lo, lo + width - 1);

        buckets.size.entry(size_key).or_default().push(delay);
        buckets
            .protocol
            .entry(packet.protocol_label().to_string())
            .or_default()
            .push(delay);
        buckets
            .src_ip
            .entry(packet.src_ip.clone())
            .or_default()
            .push(delay);
        buckets
            .dst_ip
            .entry(packet.dst_ip.clone())
            .or_default()
            .push(delay);
        buckets
            .path
            .entry(format!("{} -> {}", packet.src_ip, packet.dst_ip))
            .or_default()
            .push(delay);

        let src = packet.src_port();
        let dst = packet.dst_port().filter(|p| Some(*p) != src);
        for port in src.into_iter().chain(dst) {
            buckets.port.entry(port.to_string()).or_default().push(delay);
        }
    }
}

/// Buckets with more than `min_samples` samples, highest average first,
/// at most `limit` of them.
fn rank(buckets: &BTreeMap<String, Vec<f64>>, min_samples: usize, limit: usize) -> Vec<RootCauseBucket> {
    let mut ranked: Vec<RootCauseBucket> = buckets
        .iter()
        .filter(|(_, delays)| delays.len() > min_samples)
        .map(|(key, delays)| RootCauseBucket::new(key.clone(), delays))
        .collect();
    // Stable sort keeps key order among equal averages.
    ranked.sort_by(|a, b| b.avg_delay.total_cmp(&a.avg_delay));
    ranked.truncate(limit);
    ranked
}

fn cause(factor: CauseFactor, bucket: &RootCauseBucket) -> LikelyCause {
    let subject = match factor {
        CauseFactor::PacketSize => format!("packets of {} bytes", bucket.key),
        CauseFactor::Protocol => format!("{} traffic", bucket.key),
        CauseFactor::Path => format!("traffic {}", bucket.key),
    };
    LikelyCause {
        factor,
        key: bucket.key.clone(),
        avg_delay: bucket.avg_delay,
        count: bucket.count,
        evidence: format!(
            "{} delays averaging {:.2} ms for {}",
            bucket.count,
            bucket.avg_delay * 1000.0,
            subject
        ),
    }
}

/// Total number of samples across buckets.
pub fn total_count(buckets: &[RootCauseBucket]) -> usize {
    buckets.iter().map(|b| b.count).sum()
}
