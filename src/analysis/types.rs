//! Core data types for mesh trace analysis.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Time of day as printed by the serial monitor. Carries no date.
pub type LogTime = NaiveTime;

/// A node address, normalized to lowercase hex with a `0x` prefix and at
/// least two digits.
///
/// Addresses are compared as normalized strings, never numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse a base-16 address token, with or without a `0x` prefix.
    pub fn parse_hex(token: &str) -> Option<Self> {
        let digits = token
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        let value = u64::from_str_radix(digits, 16).ok()?;
        Some(Self::from_value(value))
    }

    pub fn from_value(value: u64) -> Self {
        Address(format!("0x{:02x}", value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Packet type bitmask as logged by the firmware (`Type: 00000010`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketType(pub u8);

impl PacketType {
    pub const NEED_ACK: PacketType = PacketType(1);
    pub const DATA: PacketType = PacketType(2);
    pub const HELLO: PacketType = PacketType(4);
    pub const ACK: PacketType = PacketType(8);
    pub const XL_DATA: PacketType = PacketType(16);
    pub const LOST: PacketType = PacketType(32);
    pub const SYNC: PacketType = PacketType(64);

    /// Every named flag with its report label
    pub const FLAGS: [(PacketType, &'static str); 7] = [
        (Self::NEED_ACK, "NEED_ACK"),
        (Self::DATA, "DATA"),
        (Self::HELLO, "HELLO"),
        (Self::ACK, "ACK"),
        (Self::XL_DATA, "XL_DATA"),
        (Self::LOST, "LOST"),
        (Self::SYNC, "SYNC"),
    ];

    /// Parse the base-2 `Type:` token.
    pub fn parse_bits(token: &str) -> Option<Self> {
        u8::from_str_radix(token.trim(), 2).ok().map(PacketType)
    }

    pub fn contains(self, flag: PacketType) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Everything except HELLO frames carries a data header.
    pub fn is_data_packet(self) -> bool {
        !self.contains(Self::HELLO)
    }

    /// Control frames are those with neither HELLO nor DATA set.
    ///
    /// A control frame is therefore also a data packet, and pays both header
    /// increments in [`HeaderLayout::overhead`].
    pub fn is_control_packet(self) -> bool {
        !(self.contains(Self::HELLO) || self.contains(Self::DATA))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08b}", self.0)
    }
}

/// Header byte costs used to derive payload size from total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLayout {
    /// Base header present on every packet
    pub base: u32,
    /// Extra bytes for data packets (`via`)
    pub data: u32,
    /// Extra bytes for control packets (`seq_id`, `num`)
    pub control: u32,
}

impl HeaderLayout {
    pub fn overhead(&self, packet_type: PacketType) -> u32 {
        let mut size = self.base;
        if packet_type.is_data_packet() {
            size += self.data;
        }
        if packet_type.is_control_packet() {
            size += self.control;
        }
        size
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            base: 6,
            data: 2,
            control: 3,
        }
    }
}

/// Whether the observing node sent or received the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "sent"),
            Direction::Received => write!(f, "received"),
        }
    }
}

/// A single observed packet transmission or reception
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEvent {
    /// Firmware packet id; `None` when the line carried no readable id
    pub id: Option<u32>,
    /// Address of the node whose log recorded this event
    pub observer: Option<Address>,
    pub timestamp: LogTime,
    pub packet_type: PacketType,
    pub source: Option<Address>,
    pub destination: Option<Address>,
    /// Only populated for data packets
    pub via: Option<Address>,
    /// Only populated for control packets
    pub seq_id: Option<u32>,
    /// Only populated for control packets
    pub num: Option<u32>,
    /// `total_size` minus header overhead; negative when the size was unreadable
    pub payload_size: i64,
    pub total_size: u32,
    pub direction: Direction,
}

impl PacketEvent {
    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// Firmware-reported fault line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub observer: Option<Address>,
    pub timestamp: LogTime,
}

/// Observed depth of a node's outbound send queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSample {
    /// Strictly increasing per node
    pub order: u64,
    pub timestamp: LogTime,
    pub queue_length: u32,
}

/// Why a line could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ParseFailure {
    #[error("missing or malformed timestamp")]
    MissingTimestamp,
    #[error("missing or malformed Type: field")]
    MissingType,
    #[error("missing or malformed queue length")]
    MissingQueueLength,
}

/// A recoverable parse failure with its location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub file: String,
    /// 1-based line number
    pub line: usize,
    pub reason: ParseFailure,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Try parse failed at file {}, line {}: {}",
            self.file, self.line, self.reason
        )
    }
}

/// All data ingested from a single node's log file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    /// File name, used as the node label in reports
    pub name: String,
    pub path: PathBuf,
    /// `None` when the log never announced an address
    pub address: Option<Address>,
    /// Raw "Receiving LoRa packet" lines, counted whether or not a record parsed
    pub radio_receptions: usize,
    /// Sent and received packets in file order
    pub packets: Vec<PacketEvent>,
    pub errors: Vec<ErrorEvent>,
    pub queue_samples: Vec<QueueSample>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl Node {
    pub fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> impl Iterator<Item = &PacketEvent> {
        self.packets.iter().filter(|p| p.direction == Direction::Sent)
    }

    pub fn received(&self) -> impl Iterator<Item = &PacketEvent> {
        self.packets
            .iter()
            .filter(|p| p.direction == Direction::Received)
    }
}

/// The union of every node's events after ingestion completes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkTrace {
    /// Nodes in the order their files were given
    pub nodes: Vec<Node>,
    /// Files that could not be opened
    pub unreadable: Vec<PathBuf>,
}

impl NetworkTrace {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            unreadable: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn packets(&self) -> impl Iterator<Item = &PacketEvent> {
        self.nodes.iter().flat_map(|n| n.packets.iter())
    }

    pub fn sent(&self) -> impl Iterator<Item = &PacketEvent> {
        self.nodes.iter().flat_map(|n| n.sent())
    }

    pub fn received(&self) -> impl Iterator<Item = &PacketEvent> {
        self.nodes.iter().flat_map(|n| n.received())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorEvent> {
        self.nodes.iter().flat_map(|n| n.errors.iter())
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &ParseDiagnostic> {
        self.nodes.iter().flat_map(|n| n.diagnostics.iter())
    }
}

/// A send paired with every receipt that plausibly corresponds to it
#[derive(Debug, Clone)]
pub struct CorrelatedDelivery<'a> {
    pub send: &'a PacketEvent,
    /// Receipts in the order they were encountered
    pub receipts: Vec<&'a PacketEvent>,
}

/// Owned projection of a [`CorrelatedDelivery`] for reports and plots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub sender: Option<Address>,
    pub id: Option<u32>,
    pub packet_type: PacketType,
    pub sent_at: LogTime,
    pub reception_count: usize,
    pub observers: Vec<Option<Address>>,
}

/// Counts restricted to a single packet category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub label: String,
    pub flag: PacketType,
    pub sent: usize,
    pub received: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub max_possible_received: usize,
    pub loss_percent: Option<f64>,
}

/// Per-node counts for the node table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub address: Option<Address>,
    pub sent: usize,
    pub received: usize,
    pub data_sent: usize,
    pub data_received: usize,
    pub route_sent: usize,
    pub route_received: usize,
    pub radio_receptions: usize,
    pub errors: usize,
    pub diagnostics: usize,
}

/// Aggregate view over all correlated deliveries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub sends: usize,
    pub matched_receipts: usize,
    pub mean_receptions_per_send: f64,
    pub unreceived_sends: usize,
}

/// One point of a queue-depth timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePoint {
    pub order: u64,
    /// Days elapsed since the node's first sample
    pub day: u32,
    pub time_of_day: LogTime,
    /// Microseconds since midnight of the node's first day
    pub offset_micros: i64,
    pub queue_length: u32,
}

/// Queue-depth time series of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTimeline {
    pub node: String,
    pub address: Option<Address>,
    pub points: Vec<QueuePoint>,
}

/// Network-wide delivery and loss statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub node_count: usize,
    /// `max - min` event time, `H:MM:SS.mmm`
    pub elapsed: Option<String>,
    pub elapsed_micros: Option<i64>,
    pub total_sent: usize,
    pub total_received: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub max_possible_received: usize,
    pub loss_count: i64,
    /// `(received / max_possible - 1) * 100`; negative when packets were lost
    pub loss_percent: Option<f64>,
    pub max_possible_bytes: u64,
    pub lost_bytes: i64,
    pub radio_receptions: usize,
    /// Average per-node loss based on raw radio receptions, two decimals
    pub radio_loss_percent: Option<f64>,
    pub error_count: usize,
    pub diagnostic_count: usize,
    pub categories: Vec<CategoryStats>,
    pub nodes: Vec<NodeSummary>,
    pub correlation: CorrelationSummary,
    pub queue_timelines: Vec<QueueTimeline>,
}
