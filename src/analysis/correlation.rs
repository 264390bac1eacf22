//! Cross-node correlation of sends with their receipts.
//!
//! Nodes have independent clocks, so a receipt is matched to a send by a
//! time window plus exact equality of type, addresses and sizes. The match is
//! a heuristic: nearby identical packets can match each other, and one
//! receipt may be attributed to several sends.

use std::time::Duration;

use chrono::TimeDelta;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::types::*;

/// How the time window around a send is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// `t - tol <= other || t + tol >= other`, as reported by the original
    /// analysis. Either bound alone admits the receipt.
    #[default]
    Compatible,
    /// `|t - other| <= tol`
    Strict,
}

/// Identity rule for "the same packet" seen on two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRule {
    pub tolerance: TimeDelta,
    pub window: WindowMode,
}

impl MatchRule {
    pub fn new(tolerance: Duration, window: WindowMode) -> Self {
        let micros = i64::try_from(tolerance.as_micros()).unwrap_or(i64::MAX);
        Self {
            tolerance: TimeDelta::microseconds(micros),
            window,
        }
    }

    pub fn within_window(&self, at: LogTime, other: LogTime) -> bool {
        // other - at, with no wraparound at midnight
        let delta = other.signed_duration_since(at);
        match self.window {
            WindowMode::Compatible => delta >= -self.tolerance || delta <= self.tolerance,
            WindowMode::Strict => delta >= -self.tolerance && delta <= self.tolerance,
        }
    }

    pub fn same_fields(send: &PacketEvent, receipt: &PacketEvent) -> bool {
        send.packet_type == receipt.packet_type
            && send.source == receipt.source
            && send.destination == receipt.destination
            && send.payload_size == receipt.payload_size
            && send.total_size == receipt.total_size
    }

    pub fn matches(&self, send: &PacketEvent, receipt: &PacketEvent) -> bool {
        Self::same_fields(send, receipt) && self.within_window(send.timestamp, receipt.timestamp)
    }
}

impl Default for MatchRule {
    fn default() -> Self {
        Self::new(Duration::from_micros(200), WindowMode::Compatible)
    }
}

/// Match every send against every receipt.
///
/// Receipts keep the order of `receipts`; a receipt may appear under more
/// than one send.
pub fn correlate_events<'a>(
    sends: &[&'a PacketEvent],
    receipts: &[&'a PacketEvent],
    rule: &MatchRule,
) -> Vec<CorrelatedDelivery<'a>> {
    sends
        .par_iter()
        .map(|&send| CorrelatedDelivery {
            send,
            receipts: receipts
                .iter()
                .copied()
                .filter(|receipt| rule.matches(send, receipt))
                .collect(),
        })
        .collect()
}

/// Correlate every sent packet in the trace with receipts network-wide
pub fn correlate<'a>(trace: &'a NetworkTrace, rule: &MatchRule) -> Vec<CorrelatedDelivery<'a>> {
    let sends: Vec<&PacketEvent> = trace.sent().collect();
    let receipts: Vec<&PacketEvent> = trace.received().collect();

    log::info!(
        "Correlating {} sends against {} receipts (tolerance {}us, {:?} window)",
        sends.len(),
        receipts.len(),
        rule.tolerance.num_microseconds().unwrap_or(i64::MAX),
        rule.window
    );

    correlate_events(&sends, &receipts, rule)
}

/// Owned per-send reception counts, ordered by send time for display
pub fn group_receptions(deliveries: &[CorrelatedDelivery<'_>]) -> Vec<DeliverySummary> {
    let mut summaries: Vec<DeliverySummary> = deliveries
        .iter()
        .map(|d| DeliverySummary {
            sender: d.send.observer.clone(),
            id: d.send.id,
            packet_type: d.send.packet_type,
            sent_at: d.send.timestamp,
            reception_count: d.receipts.len(),
            observers: d.receipts.iter().map(|r| r.observer.clone()).collect(),
        })
        .collect();

    summaries.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    summaries
}

/// Matched receipts recorded by the node with `address`.
///
/// A node without an address never matches.
pub fn receipts_observed_by<'a>(
    deliveries: &[CorrelatedDelivery<'a>],
    address: Option<&Address>,
) -> Vec<&'a PacketEvent> {
    let Some(address) = address else {
        return Vec::new();
    };

    deliveries
        .iter()
        .flat_map(|d| d.receipts.iter().copied())
        .filter(|r| r.observer.as_ref() == Some(address))
        .collect()
}
