//! Broker processing delay: a message enters a broker, and after a
//! noticeable pause the broker fans responses out to several destinations.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::{DelayDetector, DelayEvent, DetectorInput, DetectorOutput};
use crate::config::BrokerConfig;
use crate::packet::{PacketRecord, UNKNOWN_ADDR};

const NAME: &str = "broker";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerEvent {
    pub broker_ip: String,
    pub in_time: f64,
    pub out_time: f64,
    pub delay: f64,
    pub response_count: usize,
    pub destinations: usize,
}

pub struct BrokerDetector {
    config: BrokerConfig,
}

impl BrokerDetector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Hosts seen on the receiving end of a broker port or sending from one.
    fn candidate_brokers<'a>(&self, packets: &[&'a PacketRecord]) -> BTreeSet<&'a str> {
        let ports = &self.config.ports;
        let mut brokers = BTreeSet::new();
        for &packet in packets {
            if packet.dst_port().is_some_and(|p| ports.contains(&p)) {
                brokers.insert(packet.dst_ip.as_str());
            }
            if packet.src_port().is_some_and(|p| ports.contains(&p)) {
                brokers.insert(packet.src_ip.as_str());
            }
        }
        brokers.remove(UNKNOWN_ADDR);
        brokers
    }

    fn detect_broker(&self, broker_ip: &str, packets: &[&PacketRecord]) -> Vec<DelayEvent> {
        let to_broker: Vec<&PacketRecord> = packets
            .iter()
            .copied()
            .filter(|p| p.dst_ip == broker_ip)
            .collect();
        let from_broker: Vec<&PacketRecord> = packets
            .iter()
            .copied()
            .filter(|p| p.src_ip == broker_ip)
            .collect();

        if to_broker.is_empty() || from_broker.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        for position in sample_positions(to_broker.len(), self.config.sample_limit) {
            let in_time = to_broker[position].timestamp;

            let first = from_broker.partition_point(|p| p.timestamp <= in_time);
            let Some(response) = from_broker.get(first) else {
                continue;
            };
            let out_time = response.timestamp;
            let delay = out_time - in_time;
            if delay <= self.config.min_delay_secs {
                continue;
            }

            let window_end = out_time + self.config.response_window_secs;
            let last = from_broker.partition_point(|p| p.timestamp <= window_end);
            let window = &from_broker[first..last.max(first)];
            if window.len() < self.config.min_responses {
                continue;
            }

            let destinations: BTreeSet<&str> = window.iter().map(|p| p.dst_ip.as_str()).collect();
            if destinations.len() >= self.config.min_destinations {
                events.push(DelayEvent::Broker(BrokerEvent {
                    broker_ip: broker_ip.to_string(),
                    in_time,
                    out_time,
                    delay,
                    response_count: window.len(),
                    destinations: destinations.len(),
                }));
            }
        }
        events
    }
}

/// Evenly spaced sample positions: all of `0..n` when `n <= limit`,
/// otherwise `floor(i * (n - 1) / (limit - 1))` for `i` in `0..limit`.
fn sample_positions(n: usize, limit: usize) -> Vec<usize> {
    if n <= limit {
        return (0..n).collect();
    }
    if limit <= 1 {
        return vec![0; limit];
    }
    (0..limit).map(|i| i * (n - 1) / (limit - 1)).collect()
}

impl DelayDetector for BrokerDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput {
        let packets: Vec<&PacketRecord> = input
            .timeline
            .packets()
            .iter()
            .filter(|p| p.has_ip())
            .collect();
        let broker_packets = packets
            .iter()
            .filter(|p| p.touches_port(&self.config.ports))
            .count();
        if broker_packets < 2 {
            return DetectorOutput::skipped(
                NAME,
                format!("need at least 2 broker-port packets, got {}", broker_packets),
            );
        }

        let brokers: Vec<&str> = self.candidate_brokers(&packets).into_iter().collect();
        let events: Vec<DelayEvent> = brokers
            .par_iter()
            .map(|broker_ip| self.detect_broker(broker_ip, &packets))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Broker: {} brokers examined over {} broker-port packets, {} events",
            brokers.len(),
            broker_packets,
            events.len()
        );
        DetectorOutput::ran(NAME, brokers.len(), events)
    }
}
