//! TOML configuration for delay-scope.
//!
//! Every detector threshold has a default here; a config file only needs
//! the values it changes. CLI flags override the output and input sections.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::clustering::{Dbscan, KMeans1d};
use crate::error::AnalyzerError;
use crate::export::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if it exists, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.input.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }
        if self.input.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be greater than 0");
        }
        self.analysis.validate()?;
        Ok(())
    }
}

/// Input-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Records per batch sent from the capture reader
    pub batch_size: usize,
    /// Number of batches buffered between reader and collector
    pub channel_capacity: usize,
    /// Stop after this many packets (0 = read the whole capture)
    pub max_packets: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            batch_size: 4_096,
            channel_capacity: 16,
            max_packets: 0,
        }
    }
}

/// Parameters of every analysis stage
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Density clustering shared by bundling and congestion detection
    pub clustering: Dbscan,
    pub bundling: BundlingConfig,
    pub broker: BrokerConfig,
    pub congestion: CongestionConfig,
    pub jitter: JitterConfig,
    pub patterns: PatternConfig,
    pub root_cause: RootCauseConfig,
}

impl AnalysisConfig {
    pub fn validate(&self) -> std::result::Result<(), AnalyzerError> {
        let invalid = |reason: &str| {
            Err(AnalyzerError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if !(self.clustering.eps > 0.0) {
            return invalid("clustering.eps must be greater than 0");
        }
        if self.clustering.min_samples == 0 {
            return invalid("clustering.min_samples must be greater than 0");
        }
        if !(self.bundling.small_packet_ratio > 0.0 && self.bundling.small_packet_ratio <= 1.0) {
            return invalid("bundling.small_packet_ratio must be in (0, 1]");
        }
        if self.broker.sample_limit == 0 {
            return invalid("broker.sample_limit must be greater than 0");
        }
        if self.congestion.max_window == 0 {
            return invalid("congestion.max_window must be greater than 0");
        }
        if self.congestion.window_padding_secs < 0.0 {
            return invalid("congestion.window_padding_secs must not be negative");
        }
        if self.patterns.kmeans.k < 2 {
            return invalid("patterns.kmeans.k must be at least 2");
        }
        if self.root_cause.size_bucket_bytes == 0 {
            return invalid("root_cause.size_bucket_bytes must be greater than 0");
        }
        Ok(())
    }
}

/// Bundling (small-packet aggregation) detection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BundlingConfig {
    /// Minimum packets in the capture before the detector runs
    pub min_capture_packets: usize,
    /// Minimum packets from one source
    pub min_source_packets: usize,
    /// A packet is small when its size is below `ratio * median`
    pub small_packet_ratio: f64,
    /// Minimum small packets from one source
    pub min_small_packets: usize,
    /// Scale applied to the normalized inter-packet-time axis
    pub time_scale: f64,
    /// Minimum points in a cluster to report it
    pub min_cluster_points: usize,
    /// Minimum cluster span in seconds
    pub min_duration_secs: f64,
}

impl Default for BundlingConfig {
    fn default() -> Self {
        Self {
            min_capture_packets: 5,
            min_source_packets: 3,
            small_packet_ratio: 0.7,
            min_small_packets: 3,
            time_scale: 10.0,
            min_cluster_points: 3,
            min_duration_secs: 0.01,
        }
    }
}

/// Message-broker processing delay detection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Well-known broker ports (MQTT by default; add 5671/5672 for AMQP)
    pub ports: Vec<u16>,
    /// Maximum to-broker packets examined per broker
    pub sample_limit: usize,
    /// Minimum request-to-response delay in seconds
    pub min_delay_secs: f64,
    /// Fan-out window after the first response in seconds
    pub response_window_secs: f64,
    /// Minimum responses inside the window
    pub min_responses: usize,
    /// Minimum distinct response destinations inside the window
    pub min_destinations: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ports: vec![1883, 8883],
            sample_limit: 100,
            min_delay_secs: 0.05,
            response_window_secs: 0.5,
            min_responses: 2,
            min_destinations: 2,
        }
    }
}

/// Network congestion detection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CongestionConfig {
    pub min_packets: usize,
    /// Upper bound of the adaptive window, `min(max_window, n / 5 + 1)`
    pub max_window: usize,
    /// Flag windows whose deviation exceeds `multiplier * mean deviation`
    pub std_multiplier: f64,
    /// Report clusters whose mean delay exceeds `factor * global mean`
    pub increase_factor: f64,
    pub min_flows: usize,
    /// Extra time added on both sides of a cluster before measuring it
    pub window_padding_secs: f64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            min_packets: 10,
            max_window: 15,
            std_multiplier: 2.0,
            increase_factor: 1.5,
            min_flows: 2,
            window_padding_secs: 0.0,
        }
    }
}

/// Per-flow jitter detection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JitterConfig {
    pub min_flow_packets: usize,
    /// Minimum mean jitter in seconds
    pub threshold_secs: f64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_flow_packets: 5,
            threshold_secs: 0.01,
        }
    }
}

/// Traffic pattern and anomaly detection. `*_min_delays` are exclusive
/// lower bounds on a flow's delay count.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PatternConfig {
    pub periodic_min_delays: usize,
    /// Maximum σ/μ for a periodic flow
    pub periodic_max_cv: f64,
    pub periodic_min_period_secs: f64,
    pub burst_min_delays: usize,
    /// Gap center must exceed `ratio * burst center`
    pub burst_gap_ratio: f64,
    /// Burst cluster size must be in `(margin, n - margin)`
    pub burst_margin: usize,
    pub kmeans: KMeans1d,
    pub irregular_min_delays: usize,
    pub irregular_sigma: f64,
    pub spike_min_delays: usize,
    pub spike_ratio: f64,
    pub spike_min_secs: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            periodic_min_delays: 5,
            periodic_max_cv: 0.2,
            periodic_min_period_secs: 0.001,
            burst_min_delays: 10,
            burst_gap_ratio: 3.0,
            burst_margin: 5,
            kmeans: KMeans1d::default(),
            irregular_min_delays: 5,
            irregular_sigma: 3.0,
            spike_min_delays: 3,
            spike_ratio: 5.0,
            spike_min_secs: 0.01,
        }
    }
}

/// Root-cause correlation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RootCauseConfig {
    /// Only delays above this many seconds are correlated
    pub min_delay_secs: f64,
    pub size_bucket_bytes: u32,
    /// Endpoint and port buckets need more than this many samples
    pub min_endpoint_samples: usize,
    /// Entries reported per endpoint and port dimension
    pub top_n: usize,
}

impl Default for RootCauseConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 0.001,
            size_bucket_bytes: 100,
            min_endpoint_samples: 5,
            top_n: 10,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Output file path (None = stdout)
    pub file: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.analysis.broker.ports, vec![1883, 8883]);
        assert_eq!(config.analysis.broker.sample_limit, 100);
        assert_eq!(config.analysis.clustering.eps, 0.5);
        assert_eq!(config.analysis.clustering.min_samples, 2);
        assert_eq!(config.analysis.congestion.window_padding_secs, 0.0);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.input.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_analysis_config_validate() {
        let mut analysis = AnalysisConfig::default();
        assert!(analysis.validate().is_ok());

        analysis.clustering.eps = 0.0;
        assert!(matches!(
            analysis.validate(),
            Err(AnalyzerError::InvalidConfig { .. })
        ));

        let mut analysis = AnalysisConfig::default();
        analysis.bundling.small_packet_ratio = 1.5;
        assert!(analysis.validate().is_err());

        let mut analysis = AnalysisConfig::default();
        analysis.patterns.kmeans.k = 1;
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[input]"));
        assert!(config_str.contains("[analysis.broker]"));
        assert!(config_str.contains("[analysis.patterns.kmeans]"));
        assert!(config_str.contains("[output]"));

        let parsed: Config = toml::from_str(&config_str).unwrap();
        assert_eq!(parsed.analysis, AnalysisConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[input]
batch_size = 512

[analysis.broker]
ports = [1883, 8883, 5671, 5672]

[analysis.congestion]
window_padding_secs = 0.1

[analysis.clustering]
eps = 0.25

[output]
format = "json"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.input.batch_size, 512);
        assert_eq!(config.analysis.broker.ports, vec![1883, 8883, 5671, 5672]);
        assert_eq!(config.analysis.broker.sample_limit, 100);
        assert_eq!(config.analysis.congestion.window_padding_secs, 0.1);
        assert_eq!(config.analysis.clustering.eps, 0.25);
        assert_eq!(config.analysis.clustering.min_samples, 2);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delay-scope.toml");
        std::fs::write(&path, "[analysis.jitter]\nthreshold_secs = 0.02\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.analysis.jitter.threshold_secs, 0.02);
        assert_eq!(config.analysis.jitter.min_flow_packets, 5);
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let config = Config::load_or_default(Some(Path::new("/nonexistent/delay-scope.toml")));
        assert_eq!(config.analysis, AnalysisConfig::default());
    }
}
