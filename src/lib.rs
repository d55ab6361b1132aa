//! delay-scope: batch delay, jitter and congestion analysis of packet captures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Capture   │────>│  Collector  │────>│   Engine    │────>│   Export    │
//! │ (pcap/json) │ mpsc│  (batches)  │     │   (rayon)   │     │ text / json │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!  blocking task          async           spawn_blocking
//! ```
//!
//! - **Capture**: normalizes pcap frames or JSON records into [`packet::PacketRecord`]s
//! - **Engine**: reconstructs flows, runs the delay detectors, pattern and
//!   anomaly detection, root-cause correlation and scoring in parallel
//! - **Export**: renders the [`report::AnalysisResult`]

pub mod capture;
pub mod clustering;
pub mod config;
pub mod delay;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod export;
pub mod flow;
pub mod packet;
pub mod patterns;
pub mod report;
pub mod root_cause;
pub mod scoring;
pub mod stats;
pub mod tcp_window;
pub mod traffic_stats;

pub use engine::analyze;
pub use error::{AnalyzerError, CaptureError};
pub use report::AnalysisResult;
