//! Network-wide delivery statistics and queue-depth timelines.

use chrono::{TimeDelta, Timelike};

use super::types::*;
use crate::utils::duration::format_elapsed;

const MICROS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000;

/// Compute network statistics over a trace and its correlations
pub fn aggregate(trace: &NetworkTrace, deliveries: &[CorrelatedDelivery<'_>]) -> Stats {
    let node_count = trace.node_count();
    let others = node_count.saturating_sub(1);

    let total_sent = trace.sent().count();
    let total_received = trace.received().count();
    let bytes_sent: u64 = trace.sent().map(|p| u64::from(p.total_size)).sum();
    let bytes_received: u64 = trace.received().map(|p| u64::from(p.total_size)).sum();

    let max_possible_received = total_sent * others;
    let max_possible_bytes = bytes_sent * others as u64;
    let radio_receptions: usize = trace.nodes.iter().map(|n| n.radio_receptions).sum();

    let elapsed = elapsed_time(trace);

    Stats {
        node_count,
        elapsed: elapsed.map(format_elapsed),
        elapsed_micros: elapsed.and_then(|d| d.num_microseconds()),
        total_sent,
        total_received,
        bytes_sent,
        bytes_received,
        max_possible_received,
        loss_count: max_possible_received as i64 - total_received as i64,
        loss_percent: loss_percent(total_received, max_possible_received),
        max_possible_bytes,
        lost_bytes: max_possible_bytes as i64 - bytes_received as i64,
        radio_receptions,
        radio_loss_percent: radio_loss_percent(total_sent, radio_receptions, node_count),
        error_count: trace.errors().count(),
        diagnostic_count: trace.diagnostics().count(),
        categories: category_stats(trace),
        nodes: trace.nodes.iter().map(node_summary).collect(),
        correlation: correlation_summary(deliveries),
        queue_timelines: trace.nodes.iter().map(queue_timeline).collect(),
    }
}

/// `max - min` over every packet and error timestamp
pub fn elapsed_time(trace: &NetworkTrace) -> Option<TimeDelta> {
    let times = trace
        .packets()
        .map(|p| p.timestamp)
        .chain(trace.errors().map(|e| e.timestamp));

    let (min, max) = times.fold(None, |acc: Option<(LogTime, LogTime)>, t| match acc {
        None => Some((t, t)),
        Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
    })?;

    Some(max.signed_duration_since(min))
}

/// `(received / max_possible - 1) * 100`.
///
/// Negative when packets were lost; the sign is kept as reported.
pub fn loss_percent(received: usize, max_possible: usize) -> Option<f64> {
    if max_possible == 0 {
        return None;
    }
    Some((received as f64 / max_possible as f64 - 1.0) * 100.0)
}

/// Average per-node loss from raw radio receptions, rounded to two decimals
fn radio_loss_percent(sent: usize, radio_receptions: usize, node_count: usize) -> Option<f64> {
    if node_count < 2 || sent == 0 {
        return None;
    }
    let n = node_count as f64;
    let max_per_node = sent as f64 / n * (n - 1.0);
    let real_per_node = radio_receptions as f64 / n;
    let loss = (1.0 - real_per_node / max_per_node) * 100.0;
    Some((loss * 100.0).round() / 100.0)
}

/// The same counts restricted to each packet type flag
pub fn category_stats(trace: &NetworkTrace) -> Vec<CategoryStats> {
    let others = trace.node_count().saturating_sub(1);

    PacketType::FLAGS
        .iter()
        .map(|&(flag, label)| {
            let sent: Vec<&PacketEvent> = trace
                .sent()
                .filter(|p| p.packet_type.contains(flag))
                .collect();
            let received: Vec<&PacketEvent> = trace
                .received()
                .filter(|p| p.packet_type.contains(flag))
                .collect();
            let max_possible_received = sent.len() * others;

            CategoryStats {
                label: label.to_string(),
                flag,
                sent: sent.len(),
                received: received.len(),
                bytes_sent: sent.iter().map(|p| u64::from(p.total_size)).sum(),
                bytes_received: received.iter().map(|p| u64::from(p.total_size)).sum(),
                max_possible_received,
                loss_percent: loss_percent(received.len(), max_possible_received),
            }
        })
        .collect()
}

fn node_summary(node: &Node) -> NodeSummary {
    let is_route = |p: &&PacketEvent| p.packet_type.contains(PacketType::HELLO);
    let is_data = |p: &&PacketEvent| p.packet_type.contains(PacketType::DATA);

    NodeSummary {
        name: node.name.clone(),
        address: node.address.clone(),
        sent: node.sent().count(),
        received: node.received().count(),
        data_sent: node.sent().filter(is_data).count(),
        data_received: node.received().filter(is_data).count(),
        route_sent: node.sent().filter(is_route).count(),
        route_received: node.received().filter(is_route).count(),
        radio_receptions: node.radio_receptions,
        errors: node.errors.len(),
        diagnostics: node.diagnostics.len(),
    }
}

pub fn correlation_summary(deliveries: &[CorrelatedDelivery<'_>]) -> CorrelationSummary {
    let sends = deliveries.len();
    let matched_receipts: usize = deliveries.iter().map(|d| d.receipts.len()).sum();

    CorrelationSummary {
        sends,
        matched_receipts,
        mean_receptions_per_send: if sends == 0 {
            0.0
        } else {
            matched_receipts as f64 / sends as f64
        },
        unreceived_sends: deliveries.iter().filter(|d| d.receipts.is_empty()).count(),
    }
}

/// Queue depth over time for one node.
///
/// Samples only carry a time of day. Each 23h → 0h transition between
/// consecutive samples starts a new day, so offsets keep increasing across
/// midnight. Rollovers are tracked per node.
pub fn queue_timeline(node: &Node) -> QueueTimeline {
    let mut day: u32 = 0;
    let mut previous_hour: Option<u32> = None;

    let points = node
        .queue_samples
        .iter()
        .map(|sample| {
            let hour = sample.timestamp.hour();
            if previous_hour == Some(23) && hour == 0 {
                day += 1;
            }
            previous_hour = Some(hour);

            QueuePoint {
                order: sample.order,
                day,
                time_of_day: sample.timestamp,
                offset_micros: i64::from(day) * MICROS_PER_DAY
                    + micros_since_midnight(sample.timestamp),
                queue_length: sample.queue_length,
            }
        })
        .collect();

    QueueTimeline {
        node: node.name.clone(),
        address: node.address.clone(),
        points,
    }
}

fn micros_since_midnight(t: LogTime) -> i64 {
    i64::from(t.num_seconds_from_midnight()) * 1_000_000 + i64::from(t.nanosecond() / 1_000)
}
