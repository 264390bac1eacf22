//! Line classification and field extraction for LoRa mesh serial logs.
//!
//! Every monitor line starts with the time filter prefix (`HH:MM:SS.ffffff`)
//! followed by firmware output. Packet lines carry labelled fields that are
//! read positionally: the token after `Size:` is the size, and so on.

use std::sync::LazyLock;

use chrono::NaiveTime;
use regex::Regex;

use super::types::*;

/// Counted, never turned into a record
pub const RECEIVE_COUNTER_MARKER: &str = "Receiving LoRa packet";
pub const ADDRESS_MARKER: &str = "WiFi MAC";
pub const PACKET_MARKER: &str = "> Packet ";
pub const ERROR_MARKER: &str = "> E:";
pub const QUEUE_MARKER: &str = "Size of Send Packets Queue:";

/// Record type of a raw log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    AddressAnnouncement,
    PacketRecord,
    ErrorRecord,
    QueueSample,
    ReceiveCounterOnly,
    Unrecognized,
}

/// Compiled regex patterns for the non-tokenized line kinds
pub struct LogPatterns {
    /// Match: "Local LoRa address (from WiFi MAC): A1B2"
    pub address: Regex,
    /// Match: "Size of Send Packets Queue: 3"
    pub queue_length: Regex,
}

impl LogPatterns {
    fn new() -> Self {
        Self {
            address: Regex::new(r"WiFi MAC\W*([0-9A-Fa-f]+)\s*$")
                .expect("Invalid address regex"),
            queue_length: Regex::new(r"Size of Send Packets Queue:\s*(\d+)")
                .expect("Invalid queue_length regex"),
        }
    }
}

/// Global patterns instance
pub static PATTERNS: LazyLock<LogPatterns> = LazyLock::new(LogPatterns::new);

/// Classify a line by its markers. The receive counter is checked first so
/// that its `Size:` field is never mistaken for a packet record.
pub fn classify_line(line: &str) -> LineKind {
    if line.contains(RECEIVE_COUNTER_MARKER) {
        LineKind::ReceiveCounterOnly
    } else if line.contains(ADDRESS_MARKER) {
        LineKind::AddressAnnouncement
    } else if line.contains(PACKET_MARKER) {
        LineKind::PacketRecord
    } else if line.contains(ERROR_MARKER) {
        LineKind::ErrorRecord
    } else if line.contains(QUEUE_MARKER) {
        LineKind::QueueSample
    } else {
        LineKind::Unrecognized
    }
}

/// Parse a `HH:MM:SS.ffffff` time of day. The fraction is mandatory.
pub fn parse_timestamp(s: &str) -> Option<LogTime> {
    let s = s.trim();
    match s.split_once('.') {
        Some((_, fraction)) if !fraction.is_empty() => {
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok()
        }
        _ => None,
    }
}

/// Whitespace tokens of a line with label lookup
pub struct LineTokens<'a> {
    tokens: Vec<&'a str>,
}

impl<'a> LineTokens<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split_whitespace().collect(),
        }
    }

    pub fn first(&self) -> Option<&'a str> {
        self.tokens.first().copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| *t == token)
    }

    /// Token immediately following the first occurrence of `label`
    pub fn value_after(&self, label: &str) -> Option<&'a str> {
        let index = self.tokens.iter().position(|t| *t == label)?;
        self.tokens.get(index + 1).copied()
    }

    fn decimal(&self, label: &str) -> Option<u32> {
        self.value_after(label)?.parse().ok()
    }

    fn address(&self, label: &str) -> Option<Address> {
        Address::parse_hex(self.value_after(label)?)
    }
}

/// A parsed packet line that has not yet been attributed to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub id: Option<u32>,
    pub timestamp: LogTime,
    pub packet_type: PacketType,
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub via: Option<Address>,
    pub seq_id: Option<u32>,
    pub num: Option<u32>,
    pub payload_size: i64,
    pub total_size: u32,
    pub direction: Direction,
}

impl PacketRecord {
    pub fn observed_by(self, observer: Option<Address>) -> PacketEvent {
        PacketEvent {
            id: self.id,
            observer,
            timestamp: self.timestamp,
            packet_type: self.packet_type,
            source: self.source,
            destination: self.destination,
            via: self.via,
            seq_id: self.seq_id,
            num: self.num,
            payload_size: self.payload_size,
            total_size: self.total_size,
            direction: self.direction,
        }
    }
}

/// Extract a packet record from a `> Packet ` line.
///
/// Timestamp and `Type:` are mandatory. An unreadable `Size:` counts as zero.
pub fn extract_packet(line: &str, layout: &HeaderLayout) -> Result<PacketRecord, ParseFailure> {
    let tokens = LineTokens::new(line);

    let timestamp = tokens
        .first()
        .and_then(parse_timestamp)
        .ok_or(ParseFailure::MissingTimestamp)?;
    let packet_type = tokens
        .value_after("Type:")
        .and_then(PacketType::parse_bits)
        .ok_or(ParseFailure::MissingType)?;

    let total_size = tokens.decimal("Size:").unwrap_or(0);
    let direction = if tokens.contains("send") {
        Direction::Sent
    } else {
        Direction::Received
    };

    let via = if packet_type.is_data_packet() {
        tokens.address("Via:")
    } else {
        None
    };
    let (seq_id, num) = if packet_type.is_control_packet() {
        (tokens.decimal("Seq_Id:"), tokens.decimal("Num:"))
    } else {
        (None, None)
    };

    Ok(PacketRecord {
        id: tokens.decimal("Id:"),
        timestamp,
        packet_type,
        source: tokens.address("Src:"),
        destination: tokens.address("Dst:"),
        via,
        seq_id,
        num,
        payload_size: i64::from(total_size) - i64::from(layout.overhead(packet_type)),
        total_size,
        direction,
    })
}

/// Extract the announced address from a `WiFi MAC` line
pub fn extract_address(line: &str) -> Option<Address> {
    let caps = PATTERNS.address.captures(line)?;
    Address::parse_hex(caps.get(1)?.as_str())
}

/// Extract the timestamp of a `> E:` line
pub fn extract_error_time(line: &str) -> Result<LogTime, ParseFailure> {
    LineTokens::new(line)
        .first()
        .and_then(parse_timestamp)
        .ok_or(ParseFailure::MissingTimestamp)
}

/// Extract timestamp and queue length from a send-queue size line
pub fn extract_queue_length(line: &str) -> Result<(LogTime, u32), ParseFailure> {
    let timestamp = extract_error_time(line)?;
    let length = PATTERNS
        .queue_length
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or(ParseFailure::MissingQueueLength)?;
    Ok((timestamp, length))
}
