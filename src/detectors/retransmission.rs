//! TCP retransmission: adjacent segments of a flow carrying the same
//! sequence number.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::{DelayDetector, DelayEvent, DetectorInput, DetectorOutput};
use crate::flow::Flow;

const NAME: &str = "retransmission";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetransmissionEvent {
    pub flow: String,
    pub orig_time: f64,
    pub retrans_time: f64,
    pub delay: f64,
    pub seq_num: u32,
}

pub struct RetransmissionDetector;

impl RetransmissionDetector {
    fn detect_flow(flow: &Flow<'_>) -> Vec<DelayEvent> {
        let sequenced: Vec<(f64, u32)> = flow
            .packets
            .iter()
            .filter_map(|p| p.tcp().and_then(|seg| seg.seq).map(|seq| (p.timestamp, seq)))
            .collect();

        sequenced
            .windows(2)
            .filter(|pair| pair[0].1 == pair[1].1)
            .map(|pair| {
                DelayEvent::Retransmission(RetransmissionEvent {
                    flow: flow.name.clone(),
                    orig_time: pair[0].0,
                    retrans_time: pair[1].0,
                    delay: pair[1].0 - pair[0].0,
                    seq_num: pair[0].1,
                })
            })
            .collect()
    }
}

impl DelayDetector for RetransmissionDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, input: &DetectorInput<'_>) -> DetectorOutput {
        let flows: Vec<&Flow<'_>> = input
            .flows
            .analyzable()
            .filter(|f| f.packets.iter().any(|p| p.tcp().is_some_and(|s| s.seq.is_some())))
            .collect();
        if flows.is_empty() {
            return DetectorOutput::skipped(NAME, "no TCP flows with sequence numbers");
        }

        let events: Vec<DelayEvent> = flows
            .par_iter()
            .map(|flow| Self::detect_flow(flow))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Retransmission: {} TCP flows examined, {} events",
            flows.len(),
            events.len()
        );
        DetectorOutput::ran(NAME, flows.len(), events)
    }
}
