//! # MeshTrace - Cross-node trace analysis for LoRa mesh serial logs
//!
//! This library reconstructs what happened on a LoRa mesh network from the
//! serial-console captures of each physical node. The captures are taken
//! independently, so their clocks drift and nothing ties a send on one node
//! to a receipt on another except timing and packet fields.
//!
//! ## Overview
//!
//! The pipeline runs in two phases:
//!
//! 1. **Ingestion** (parallel): each log file is parsed by its own worker
//!    into a [`analysis::Node`] holding packet, error and queue events.
//! 2. **Analysis** (read-only): sends are correlated with receipts across
//!    the network and the trace is aggregated into [`analysis::Stats`].
//!
//! ## Architecture
//!
//! - `analysis::log_parser`: line classification and field extraction
//! - `analysis::ingest`: per-node ingestion and the parallel join
//! - `analysis::correlation`: send/receipt matching
//! - `analysis::aggregate`: delivery, loss and queue-depth statistics
//! - `analysis::export`: flat row view of a trace
//! - `analysis::cache`: compressed binary trace cache
//! - `analysis::report`: JSON and text reports
//! - `config`: analyzer settings
//! - `utils`: formatting helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use meshtrace::analysis;
//! use meshtrace::config::AnalyzerConfig;
//!
//! let config = AnalyzerConfig::default();
//! let files = vec![
//!     PathBuf::from("monitor_101010_COM3.txt"),
//!     PathBuf::from("monitor_101012_COM4.txt"),
//! ];
//!
//! let trace = analysis::ingest_all(&files, &config);
//! let deliveries = analysis::correlate(&trace, &config.match_rule());
//! let stats = analysis::aggregate(&trace, &deliveries);
//!
//! println!("Total Loss: {:?} %", stats.loss_percent);
//! ```
//!
//! ## Log Format
//!
//! Lines are produced by the serial monitor's time filter:
//!
//! ```text
//! 12:00:00.000000 > Local LoRa address (from WiFi MAC): 000A
//! 12:00:00.100000 > Packet send Type: 00000010 Size: 20 Src: 0x0A Dst: 0x0B Id: 7
//! 12:00:00.100150 > Receiving LoRa packet: Size: 20 bytes RSSI: -40 SNR: 9
//! 12:00:00.200000 > Size of Send Packets Queue: 2
//! 12:00:00.300000 > E: Send queue full
//! ```
//!
//! ## Error Handling
//!
//! Malformed lines never abort ingestion: they are recorded as
//! [`analysis::ParseDiagnostic`]s and logged. File and serialization errors
//! at the edges are reported with `color_eyre`.

pub mod analysis;
pub mod config;
pub mod utils;
