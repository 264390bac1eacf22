//! Trace ingestion and cross-node correlation for LoRa mesh logs.
//!
//! This module turns per-node serial monitor captures into one network-wide
//! trace, matches sends with their receipts, and computes delivery, loss and
//! queue-depth statistics.

pub mod types;
pub mod log_parser;
pub mod ingest;
pub mod correlation;
pub mod aggregate;
pub mod export;
pub mod cache;
pub mod report;

pub use types::*;
pub use ingest::{ingest_all, ingest_file};
pub use correlation::{correlate, group_receptions, MatchRule, WindowMode};
pub use aggregate::aggregate;
pub use export::{rows_to_trace, trace_to_rows};
pub use report::{generate_json_report, generate_text_report};
