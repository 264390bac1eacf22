//! Trace analysis CLI for LoRa mesh serial logs.
//!
//! Ingests one monitor capture per node, correlates sends with receipts and
//! reports delivery, loss and queue-depth statistics.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::{info, warn};

use meshtrace::analysis::{
    self, cache, export,
    report::{self, AnalysisMetadata, TraceReport},
    NetworkTrace, WindowMode,
};
use meshtrace::config::{self, AnalyzerConfig};

#[derive(Parser, Debug)]
#[command(name = "meshtrace")]
#[command(about = "Cross-node trace analysis for LoRa mesh serial logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Analyzer configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long, default_value = "analysis_output")]
    output: PathBuf,

    /// Correlation time window (e.g. "200us", "1ms"); overrides the config file
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    tolerance: Option<Duration>,

    /// Use a two-sided time window instead of the compatible one
    #[arg(long)]
    strict_window: bool,

    /// Load the ingested trace from this cache, or create it if missing
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

/// Log files shared by every command
#[derive(clap::Args, Debug)]
struct Inputs {
    /// Node log files, one per device
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run full analysis and write every report
    Full {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Print network-wide statistics only
    Summary {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Correlate sends with receipts
    Correlate {
        /// Include per-send reception counts in the output
        #[arg(long)]
        detailed: bool,

        #[command(flatten)]
        inputs: Inputs,
    },

    /// Write per-node queue-depth timelines
    Queue {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Export every event as a flat row
    Export {
        #[command(flatten)]
        inputs: Inputs,
    },
}

impl Commands {
    fn inputs(&self) -> &Inputs {
        match self {
            Commands::Full { inputs }
            | Commands::Summary { inputs }
            | Commands::Correlate { inputs, .. }
            | Commands::Queue { inputs }
            | Commands::Export { inputs } => inputs,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    // Set thread pool size
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let config = resolve_config(&cli)?;
    let rule = config.match_rule();

    let trace = load_trace(&cli.command.inputs().files, &config, cli.cache.as_deref())?;

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create output directory: {}", cli.output.display()))?;

    match cli.command {
        Commands::Full { .. } => {
            let deliveries = analysis::correlate(&trace, &rule);
            let report = TraceReport {
                metadata: AnalysisMetadata::new(&trace, &rule),
                stats: analysis::aggregate(&trace, &deliveries),
                deliveries: Some(analysis::group_receptions(&deliveries)),
            };

            report::generate_json_report(&report, &cli.output.join("full_report.json"))?;
            report::generate_text_report(&report, &cli.output.join("report.txt"))?;
            export::write_rows(&export::trace_to_rows(&trace), &cli.output.join("data.json"))?;
            report::print_summary(&report);

            info!("Analysis complete. Reports written to {}", cli.output.display());
        }
        Commands::Summary { .. } => {
            let deliveries = analysis::correlate(&trace, &rule);
            let report = TraceReport {
                metadata: AnalysisMetadata::new(&trace, &rule),
                stats: analysis::aggregate(&trace, &deliveries),
                deliveries: None,
            };
            println!("{}", report::render_text_report(&report));
        }
        Commands::Correlate { detailed, .. } => {
            let deliveries = analysis::correlate(&trace, &rule);
            let summaries = analysis::group_receptions(&deliveries);

            if detailed {
                for summary in &summaries {
                    println!(
                        "{} SId: {} NºR: {} T: {}",
                        summary.sent_at,
                        summary
                            .sender
                            .as_ref()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        summary.reception_count,
                        summary.packet_type
                    );
                }
            }

            let summary = analysis::aggregate::correlation_summary(&deliveries);
            println!(
                "Sends: {}, matched receipts: {}, mean receptions per send: {:.2}, unreceived: {}",
                summary.sends,
                summary.matched_receipts,
                summary.mean_receptions_per_send,
                summary.unreceived_sends
            );

            write_json(&summaries, &cli.output.join("deliveries.json"))?;
        }
        Commands::Queue { .. } => {
            let timelines: Vec<_> = trace
                .nodes
                .iter()
                .map(analysis::aggregate::queue_timeline)
                .collect();

            for timeline in &timelines {
                println!("{}: {} samples", timeline.node, timeline.points.len());
            }

            write_json(&timelines, &cli.output.join("queue_timelines.json"))?;
        }
        Commands::Export { .. } => {
            let rows = export::trace_to_rows(&trace);
            export::write_rows(&rows, &cli.output.join("data.json"))?;
        }
    }

    Ok(())
}

/// Config file values with command-line overrides applied
fn resolve_config(cli: &Cli) -> Result<AnalyzerConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AnalyzerConfig::default(),
    };

    if let Some(tolerance) = cli.tolerance {
        config.tolerance = tolerance;
    }
    if cli.strict_window {
        config.window = WindowMode::Strict;
    }

    config.validate()?;
    Ok(config)
}

fn load_trace(
    files: &[PathBuf],
    config: &AnalyzerConfig,
    cache_path: Option<&Path>,
) -> Result<NetworkTrace> {
    if let Some(path) = cache_path.filter(|p| p.exists()) {
        let trace = cache::load_trace(path)?;
        if !cache_matches_inputs(&trace, files) {
            warn!(
                "Cache {} was built from other log files; command-line files are ignored",
                path.display()
            );
        }
        info!("Using cached trace; header layout from the config is not reapplied");
        return Ok(trace);
    }

    info!("Number of nodes: {}", files.len());
    let trace = analysis::ingest_all(files, config);

    if let Some(path) = cache_path {
        cache::save_trace(&trace, path)?;
    }

    Ok(trace)
}

/// Whether a cached trace was ingested from exactly `files`
fn cache_matches_inputs(trace: &NetworkTrace, files: &[PathBuf]) -> bool {
    let mut cached: Vec<&Path> = trace
        .nodes
        .iter()
        .map(|n| n.path.as_path())
        .chain(trace.unreadable.iter().map(PathBuf::as_path))
        .collect();
    let mut requested: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
    cached.sort();
    requested.sort();
    cached == requested
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Written {}", path.display());
    Ok(())
}
