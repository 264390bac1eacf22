//! Report generation for mesh trace analysis.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::correlation::MatchRule;
use super::types::*;

/// Run metadata attached to every report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_timestamp: String,
    pub log_files: Vec<String>,
    pub unreadable_files: Vec<String>,
    pub tolerance_micros: i64,
    pub window: String,
}

impl AnalysisMetadata {
    pub fn new(trace: &NetworkTrace, rule: &MatchRule) -> Self {
        Self {
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            log_files: trace.nodes.iter().map(|n| n.path.display().to_string()).collect(),
            unreadable_files: trace
                .unreadable
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            tolerance_micros: rule.tolerance.num_microseconds().unwrap_or(i64::MAX),
            window: format!("{:?}", rule.window).to_lowercase(),
        }
    }
}

/// Complete analysis output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub metadata: AnalysisMetadata,
    pub stats: Stats,
    /// Per-send reception counts, omitted unless requested
    pub deliveries: Option<Vec<DeliverySummary>>,
}

/// Generate JSON report
pub fn generate_json_report(report: &TraceReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

fn address_label(address: &Option<Address>) -> String {
    address
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn percent_label(value: Option<f64>) -> String {
    value
        .map(|v| format!("{} %", v))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Render the human-readable report body
pub fn render_text_report(report: &TraceReport) -> String {
    let stats = &report.stats;
    let mut lines: Vec<String> = Vec::new();

    // Header
    lines.push("=".repeat(80));
    lines.push("                        LORA MESH TRACE ANALYSIS".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    // Metadata
    lines.push(format!("Analysis Date: {}", report.metadata.analysis_timestamp));
    lines.push(format!("Number of nodes: {}", stats.node_count));
    lines.push(format!(
        "Correlation window: {}us ({})",
        report.metadata.tolerance_micros, report.metadata.window
    ));
    for file in &report.metadata.unreadable_files {
        lines.push(format!("Unreadable log file: {}", file));
    }
    lines.push(String::new());

    lines.push("=".repeat(80));
    lines.push("                            DELIVERY".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!(
        "Time lapsed: {}",
        stats.elapsed.as_deref().unwrap_or("n/a")
    ));
    lines.push(format!(
        "Number of packets sent: {}, Max possible Packets received: {}, Actual: {}. Loss: {} packets",
        stats.total_sent, stats.max_possible_received, stats.total_received, stats.loss_count
    ));
    lines.push(format!(
        "Number of bytes sent: {}, Max possible Bytes received: {} bytes, Actual: {} bytes. Loss: {} bytes",
        stats.bytes_sent, stats.max_possible_bytes, stats.bytes_received, stats.lost_bytes
    ));
    lines.push(format!("Total Loss: {}", percent_label(stats.loss_percent)));
    lines.push(format!(
        "Radio receptions: {}, Average per-node radio loss: {}",
        stats.radio_receptions,
        percent_label(stats.radio_loss_percent)
    ));
    lines.push(format!(
        "Errors reported: {}, Unparseable records: {}",
        stats.error_count, stats.diagnostic_count
    ));
    lines.push(String::new());

    lines.push("By packet type:".to_string());
    for category in stats.categories.iter().filter(|c| c.sent > 0 || c.received > 0) {
        lines.push(format!(
            "  {:<9} sent: {:>6} ({} bytes), received: {:>6} ({} bytes), loss: {}",
            category.label,
            category.sent,
            category.bytes_sent,
            category.received,
            category.bytes_received,
            percent_label(category.loss_percent)
        ));
    }
    lines.push(String::new());

    lines.push("Correlation:".to_string());
    lines.push(format!(
        "  Sends: {}, matched receipts: {}, mean receptions per send: {:.2}, unreceived: {}",
        stats.correlation.sends,
        stats.correlation.matched_receipts,
        stats.correlation.mean_receptions_per_send,
        stats.correlation.unreceived_sends
    ));
    lines.push(String::new());

    lines.push("=".repeat(80));
    lines.push("                              NODES".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    for node in &stats.nodes {
        lines.push(format!("{} ({})", node.name, address_label(&node.address)));
        lines.push(format!(
            "  Sent: {} (data {}, route {}), Received: {} (data {}, route {})",
            node.sent,
            node.data_sent,
            node.route_sent,
            node.received,
            node.data_received,
            node.route_received
        ));
        lines.push(format!(
            "  Radio receptions: {}, Errors: {}, Unparseable: {}",
            node.radio_receptions, node.errors, node.diagnostics
        ));
    }
    lines.push(String::new());

    let timelines: Vec<&QueueTimeline> = stats
        .queue_timelines
        .iter()
        .filter(|t| !t.points.is_empty())
        .collect();
    if !timelines.is_empty() {
        lines.push("Send queue depth:".to_string());
        for timeline in timelines {
            let peak = timeline.points.iter().map(|p| p.queue_length).max().unwrap_or(0);
            let days = timeline.points.last().map(|p| p.day).unwrap_or(0);
            lines.push(format!(
                "  {}: {} samples, peak {}, {} midnight rollovers",
                timeline.node,
                timeline.points.len(),
                peak,
                days
            ));
        }
        lines.push(String::new());
    }

    // Footer
    lines.push("=".repeat(80));

    lines.join("\n")
}

/// Generate human-readable text report
pub fn generate_text_report(report: &TraceReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_text_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &TraceReport) {
    let stats = &report.stats;

    println!("\n=== LORA MESH TRACE SUMMARY ===\n");
    println!("Number of nodes: {}", stats.node_count);
    println!("Time lapsed: {}", stats.elapsed.as_deref().unwrap_or("n/a"));
    println!(
        "Packets sent: {}, Max possible received: {}, Actual: {}",
        stats.total_sent, stats.max_possible_received, stats.total_received
    );
    println!("Total Loss: {}", percent_label(stats.loss_percent));
    println!(
        "Mean receptions per send: {:.2}",
        stats.correlation.mean_receptions_per_send
    );
    if stats.diagnostic_count > 0 {
        println!("Unparseable records: {}", stats.diagnostic_count);
    }

    println!();
}
