//! delay-scope: batch delay and congestion analysis of packet captures.
//!
//! Reads a pcap/pcapng file or a JSON array of packet records, categorizes
//! the delays it finds (bundling, broker processing, retransmission,
//! network congestion, jitter), and reports patterns, anomalies, likely
//! root causes and an overall congestion score.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use delay_scope::capture::{self, CaptureSource};
use delay_scope::config::Config;
use delay_scope::engine;
use delay_scope::export::{export_error, export_report, OutputFormat};

/// delay-scope: delay categorization and congestion scoring for packet captures.
#[derive(Parser, Debug)]
#[command(name = "delay-scope")]
#[command(version)]
#[command(about = "Categorize network delays and score congestion in packet captures")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a capture file.
    Analyze(AnalyzeArgs),

    /// Print the default configuration as TOML.
    GenerateConfig,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Path to a pcap or pcapng file.
    #[arg(short, long, conflicts_with = "records", required_unless_present = "records")]
    file: Option<PathBuf>,

    /// Path to a JSON array of packet records.
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: text, json, jsonl (overrides the config file).
    #[arg(short, long)]
    output: Option<OutputFormat>,

    /// Write the report to this file instead of stdout.
    #[arg(long)]
    out_file: Option<PathBuf>,

    /// Stop after this many packets (overrides the config file).
    #[arg(long)]
    max_packets: Option<usize>,

    /// Enable verbose logging (writes to stderr).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            init_logging(args.verbose)?;
            run_analysis(args).await
        }
        Commands::GenerateConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn run_analysis(args: AnalyzeArgs) -> Result<()> {
    let mut config = Config::load_or_default(args.config.as_deref());
    if let Some(format) = args.output {
        config.output.format = format;
    }
    if let Some(path) = &args.out_file {
        config.output.file = Some(path.display().to_string());
    }
    if let Some(max_packets) = args.max_packets {
        config.input.max_packets = max_packets;
    }
    config.validate().context("Invalid configuration")?;

    let source = match (args.file, args.records) {
        (Some(path), _) => CaptureSource::Pcap(path),
        (None, Some(path)) => CaptureSource::Records(path),
        (None, None) => anyhow::bail!("either --file or --records is required"),
    };
    info!("Analyzing {}", source.path().display());

    let (packets, stats) = capture::read_all(source, config.input.clone())
        .await
        .context("Failed to read capture")?;
    debug!(
        "Collected {} records ({} malformed frames)",
        packets.len(),
        stats.malformed
    );

    let analysis = config.analysis.clone();
    let outcome = tokio::task::spawn_blocking(move || engine::analyze(packets, &analysis))
        .await
        .context("Analysis task failed")?;

    let format = config.output.format;
    let (rendered, failure) = match outcome {
        Ok(result) => (export_report(&result, format), None),
        Err(e) => (export_error(&e, format), Some(e)),
    };
    write_output(&rendered, config.output.file.as_deref())?;

    match failure {
        Some(e) => Err::<(), _>(e).context("Analysis aborted"),
        None => Ok(()),
    }
}

fn write_output(rendered: &str, file: Option<&str>) -> Result<()> {
    match file {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path))?;
            info!("Report written to {}", path);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}
