//! Export Module
//!
//! Renders an analysis result as text, pretty JSON, or JSON Lines, and
//! renders run failures as a structured `{"error": {...}}` object.

use serde::Serialize;
use serde_json::json;

use crate::error::AnalyzerError;
use crate::report::AnalysisResult;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// Exports a result in the specified format
pub fn export_report(result: &AnalysisResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => export_text(result),
        OutputFormat::Json => export_json(result),
        OutputFormat::JsonLines => export_jsonl(result),
    }
}

/// Exports a failed run. JSON formats wrap the typed error in `{"error": ...}`.
pub fn export_error(error: &AnalyzerError, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("Error: {}\n", error),
        OutputFormat::Json => {
            let body = json!({ "error": error_body(error) });
            serde_json::to_string_pretty(&body)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
        OutputFormat::JsonLines => {
            let body = json!({ "error": error_body(error) });
            serde_json::to_string(&body).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
    }
}

fn error_body(error: &AnalyzerError) -> serde_json::Value {
    let mut body = serde_json::to_value(error).unwrap_or_else(|_| json!({}));
    if let Some(fields) = body.as_object_mut() {
        fields.insert("message".into(), json!(error.to_string()));
    }
    body
}

/// Exports the result as pretty-printed JSON
pub fn export_json(result: &AnalysisResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports the result as JSON Lines: a summary line, then one line per
/// delay event, pattern, and anomaly.
pub fn export_jsonl(result: &AnalysisResult) -> String {
    let mut lines = Vec::new();

    let summary = json!({
        "type": "summary",
        "generated_at": result.generated_at.to_rfc3339(),
        "summary": result.summary,
        "average_latency": result.average_latency,
        "congestion_score": result.congestion_score,
        "congestion_level": result.congestion_level,
        "congestion_metrics": result.congestion_metrics,
        "root_cause_summary": result.root_cause_summary,
        "detector_stats": result.detector_stats,
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    let categories = &result.delay_categories;
    push_lines(&mut lines, "delay", "bundling_delay", &categories.bundling_delay);
    push_lines(
        &mut lines,
        "delay",
        "broker_processing_delay",
        &categories.broker_processing_delay,
    );
    push_lines(
        &mut lines,
        "delay",
        "retransmission_delay",
        &categories.retransmission_delay,
    );
    push_lines(&mut lines, "delay", "network_congestion", &categories.network_congestion);
    push_lines(&mut lines, "delay", "jitter", &categories.jitter);

    push_lines(&mut lines, "pattern", "periodic", &result.patterns.periodic);
    push_lines(&mut lines, "pattern", "bursty", &result.patterns.bursty);

    push_lines(
        &mut lines,
        "anomaly",
        "irregular_delay",
        &result.anomalies.irregular_delays,
    );
    push_lines(&mut lines, "anomaly", "jitter_spike", &result.anomalies.jitter_spikes);

    lines.join("\n")
}

fn push_lines<T: Serialize>(lines: &mut Vec<String>, kind: &str, category: &str, items: &[T]) {
    for item in items {
        let line = json!({ "type": kind, "category": category, "data": item });
        if let Ok(line) = serde_json::to_string(&line) {
            lines.push(line);
        }
    }
}

/// Exports the result as formatted text
pub fn export_text(result: &AnalysisResult) -> String {
    let summary = &result.summary;
    let mut output = String::new();

    output.push_str(&format!(
        "--- Delay Analysis Report ---\nGenerated: {}\nPackets: {} | Flows: {} ({} analyzed)\nTime Span: {:.3}s - {:.3}s ({})\n",
        result.generated_at.format("%Y-%m-%d %H:%M:%S"),
        summary.packet_count,
        summary.flow_count,
        summary.analyzed_flow_count,
        summary.time_span.start,
        summary.time_span.end,
        format_secs(summary.time_span.duration),
    ));
    output.push_str(&format!(
        "Average Latency: {} | Median: {} | Max: {} | Std Dev: {}\n",
        format_secs(result.average_latency),
        format_secs(summary.delays.median),
        format_secs(summary.delays.max),
        format_secs(summary.delays.std_dev),
    ));
    output.push_str(&format!(
        "Congestion: {:.1}/100 ({})\n",
        result.congestion_score, result.congestion_level
    ));

    output.push_str("\nDelay Categories:\n");
    let counts = &summary.delay_categories;
    for (label, count) in [
        ("Bundling", counts.bundling_delays),
        ("Broker processing", counts.broker_processing_delays),
        ("Retransmission", counts.retransmission_delays),
        ("Network congestion", counts.network_congestion_events),
        ("Jitter", counts.jitter_flows),
    ] {
        output.push_str(&format!("  {:<20} {:>6}\n", label, count));
    }

    let categories = &result.delay_categories;
    if !categories.network_congestion.is_empty() {
        output.push_str("\nCongestion Events:\n");
        for event in &categories.network_congestion {
            output.push_str(&format!(
                "  {:.3}s - {:.3}s | flows: {} | max: {} | x{:.2}\n",
                event.start_time,
                event.end_time,
                event.flows_affected,
                format_secs(event.max_delay),
                event.delay_increase_factor,
            ));
        }
    }

    if !categories.retransmission_delay.is_empty() {
        output.push_str(&format!(
            "\nRetransmissions ({}):\n",
            categories.retransmission_delay.len()
        ));
        for event in &categories.retransmission_delay {
            output.push_str(&format!(
                "  {} | seq {} | after {}\n",
                event.flow,
                event.seq_num,
                format_secs(event.delay)
            ));
        }
    }

    if !categories.broker_processing_delay.is_empty() {
        output.push_str("\nBroker Processing:\n");
        for event in &categories.broker_processing_delay {
            output.push_str(&format!(
                "  {} at {:.3}s | delay {} | {} responses to {} destinations\n",
                event.broker_ip,
                event.in_time,
                format_secs(event.delay),
                event.response_count,
                event.destinations
            ));
        }
    }

    let anomalies = &result.anomalies;
    output.push_str(&format!(
        "\nPatterns: {} periodic, {} bursty | Anomalies: {} irregular delays, {} jitter spikes\n",
        result.patterns.periodic.len(),
        result.patterns.bursty.len(),
        anomalies.irregular_delays.len(),
        anomalies.jitter_spikes.len(),
    ));

    if result.root_cause_summary.likely_causes.is_empty() {
        output.push_str("Likely Causes: None identified\n");
    } else {
        output.push_str("\nLikely Causes:\n");
        output.push_str(&"-".repeat(72));
        output.push('\n');
        for cause in &result.root_cause_summary.likely_causes {
            output.push_str(&format!("  {}\n", cause.evidence));
        }
    }

    let skipped: Vec<String> = result
        .detector_stats
        .iter()
        .filter(|s| !s.ran)
        .map(|s| match &s.skip_reason {
            Some(reason) => format!("{} ({})", s.detector, reason),
            None => s.detector.to_string(),
        })
        .collect();
    if !skipped.is_empty() {
        output.push_str(&format!("\nSkipped Detectors: {}\n", skipped.join(", ")));
    }

    output
}

/// Formats a duration in seconds in a human-readable way
fn format_secs(secs: f64) -> String {
    if secs >= 1.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.2}ms", secs * 1000.0)
    }
}
