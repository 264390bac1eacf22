//! Per-node ingestion of serial monitor logs.
//!
//! Each file is streamed once by a single worker that owns its [`Node`];
//! workers share nothing and are joined by collecting their results.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{bail, Context, Result};
use rayon::prelude::*;

use super::log_parser::{self, LineKind, PacketRecord};
use super::types::*;
use crate::config::AnalyzerConfig;

/// Node state while its file is being read
struct IngestState {
    node: Node,
    /// Address from the first `WiFi MAC` line
    announced: Option<Address>,
    /// Source of the first HELLO send, used when nothing was announced
    hello_hint: Option<Address>,
    pending_packets: Vec<PacketRecord>,
    pending_errors: Vec<LogTime>,
    next_queue_order: u64,
}

impl IngestState {
    fn new(node: Node) -> Self {
        Self {
            node,
            announced: None,
            hello_hint: None,
            pending_packets: Vec::new(),
            pending_errors: Vec::new(),
            next_queue_order: 0,
        }
    }

    fn diagnose(&mut self, line: usize, reason: ParseFailure) {
        let diagnostic = ParseDiagnostic {
            file: self.node.name.clone(),
            line,
            reason,
        };
        log::warn!("{}", diagnostic);
        self.node.diagnostics.push(diagnostic);
    }

    fn handle_line(&mut self, line: &str, line_number: usize, config: &AnalyzerConfig) {
        match log_parser::classify_line(line) {
            LineKind::ReceiveCounterOnly => {
                self.node.radio_receptions += 1;
            }
            LineKind::AddressAnnouncement => {
                if self.announced.is_none() {
                    self.announced = log_parser::extract_address(line);
                }
            }
            LineKind::PacketRecord => match log_parser::extract_packet(line, &config.header) {
                Ok(record) => {
                    if self.hello_hint.is_none()
                        && record.direction == Direction::Sent
                        && record.packet_type == PacketType::HELLO
                    {
                        self.hello_hint = record.source.clone();
                    }
                    self.pending_packets.push(record);
                }
                Err(reason) => self.diagnose(line_number, reason),
            },
            LineKind::ErrorRecord => match log_parser::extract_error_time(line) {
                Ok(timestamp) => self.pending_errors.push(timestamp),
                Err(reason) => self.diagnose(line_number, reason),
            },
            LineKind::QueueSample => match log_parser::extract_queue_length(line) {
                Ok((timestamp, queue_length)) => {
                    self.node.queue_samples.push(QueueSample {
                        order: self.next_queue_order,
                        timestamp,
                        queue_length,
                    });
                    self.next_queue_order += 1;
                }
                Err(reason) => self.diagnose(line_number, reason),
            },
            LineKind::Unrecognized => {}
        }
    }

    /// Attribute every pending record to the node's final address
    fn finish(self) -> Node {
        let mut node = self.node;
        node.address = self.announced.or(self.hello_hint);

        if node.address.is_none() {
            log::info!("{}: no address announcement found", node.name);
        }

        node.packets = self
            .pending_packets
            .into_iter()
            .map(|record| record.observed_by(node.address.clone()))
            .collect();
        node.errors = self
            .pending_errors
            .into_iter()
            .map(|timestamp| ErrorEvent {
                observer: node.address.clone(),
                timestamp,
            })
            .collect();

        node
    }
}

/// Ingest a node log from any buffered reader.
///
/// Lines that are not valid UTF-8 are skipped. A read error ends the file
/// with whatever was ingested up to that point.
pub fn ingest_reader<R: BufRead>(
    reader: R,
    name: &str,
    path: &Path,
    config: &AnalyzerConfig,
) -> Node {
    let mut state = IngestState::new(Node::new(name.to_string(), path.to_path_buf()));

    for (index, chunk) in reader.split(b'\n').enumerate() {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                log::warn!("{}: read failed at line {}: {}", name, index + 1, e);
                break;
            }
        };
        let line = match std::str::from_utf8(&bytes) {
            Ok(l) => l.trim_end_matches('\r'),
            Err(_) => continue,
        };

        state.handle_line(line, index + 1, config);
    }

    state.finish()
}

/// Ingest a single node log file
pub fn ingest_file(path: &Path, config: &AnalyzerConfig) -> Result<Node> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
        bail!("Log path is a directory: {}", path.display());
    }
    let reader = BufReader::with_capacity(64 * 1024, file);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(ingest_reader(reader, &name, path, config))
}

/// Ingest all node logs in parallel, one worker per file.
///
/// Nodes keep the order of `paths`. Files that cannot be opened are logged and
/// listed in [`NetworkTrace::unreadable`].
pub fn ingest_all(paths: &[PathBuf], config: &AnalyzerConfig) -> NetworkTrace {
    log::info!("Ingesting {} node logs in parallel...", paths.len());

    let results: Vec<(PathBuf, Result<Node>)> = paths
        .par_iter()
        .map(|path| (path.clone(), ingest_file(path, config)))
        .collect();

    let mut trace = NetworkTrace::default();
    for (path, result) in results {
        match result {
            Ok(node) => {
                log::debug!(
                    "Parsed {}: {} packets, {} errors, {} queue samples, {} diagnostics",
                    node.name,
                    node.packets.len(),
                    node.errors.len(),
                    node.queue_samples.len(),
                    node.diagnostics.len()
                );
                trace.nodes.push(node);
            }
            Err(e) => {
                log::warn!("Failed to ingest {}: {:#}", path.display(), e);
                trace.unreadable.push(path);
            }
        }
    }

    let total_packets: usize = trace.nodes.iter().map(|n| n.packets.len()).sum();
    log::info!(
        "Ingested {} nodes, {} total packet events",
        trace.node_count(),
        total_packets
    );

    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ingest_str(text: &str) -> Node {
        ingest_reader(
            Cursor::new(text.as_bytes().to_vec()),
            "monitor_COM3.txt",
            Path::new("monitor_COM3.txt"),
            &AnalyzerConfig::default(),
        )
    }

    #[test]
    fn test_ingest_mixed_log() {
        let log = "\
10:00:00.000100 > Local LoRa address (from WiFi MAC): 0A
10:00:01.000000 > Packet send Type: 00000100 Size: 10 Src: 0x0A Dst: 0xFFFF Id: 1
10:00:01.100000 > Receiving LoRa packet: Size: 10 bytes RSSI: -40 SNR: 9
10:00:01.100200 > Packet received Type: 00000100 Size: 10 Src: 0x0B Dst: 0xFFFF Id: 4
10:00:02.000000 > Size of Send Packets Queue: 2
10:00:03.000000 > E: Radio busy
10:00:04.000000 > Size of Send Packets Queue: 0
";
        let node = ingest_str(log);

        assert_eq!(node.address.as_ref().unwrap().as_str(), "0x0a");
        assert_eq!(node.radio_receptions, 1);
        assert_eq!(node.sent().count(), 1);
        assert_eq!(node.received().count(), 1);
        assert_eq!(node.errors.len(), 1);
        assert_eq!(node.queue_samples.len(), 2);
        assert_eq!(node.queue_samples[0].order, 0);
        assert_eq!(node.queue_samples[1].order, 1);
        assert_eq!(node.queue_samples[0].queue_length, 2);
        assert!(node.diagnostics.is_empty());
        assert!(node
            .packets
            .iter()
            .all(|p| p.observer.as_ref().map(|a| a.as_str()) == Some("0x0a")));
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let log = "\
10:00:01.000000 > Packet send Type: 00000010 Size: 20 Src: 0x0A Dst: 0x0B Id: 1
10:00:02.000000 > Packet send Size: 20 Src: 0x0A Dst: 0x0B Id: 2
10:00:03.000000 > Packet send Type: 00000010 Size: 20 Src: 0x0A Dst: 0x0B Id: 3
";
        let node = ingest_str(log);

        assert_eq!(node.packets.len(), 2);
        assert_eq!(node.packets[1].id, Some(3));
        assert_eq!(node.diagnostics.len(), 1);
        assert_eq!(node.diagnostics[0].line, 2);
        assert_eq!(node.diagnostics[0].reason, ParseFailure::MissingType);
        assert_eq!(node.diagnostics[0].file, "monitor_COM3.txt");
    }

    #[test]
    fn test_hello_send_is_address_fallback() {
        let log = "\
10:00:00.500000 > Packet received Type: 00000100 Size: 10 Src: 0x0B Dst: 0xFFFF Id: 9
10:00:01.000000 > Packet send Type: 00000100 Size: 10 Src: 0x0C Dst: 0xFFFF Id: 1
";
        let node = ingest_str(log);

        assert_eq!(node.address.as_ref().unwrap().as_str(), "0x0c");
        // Events parsed before the hint appeared are still attributed
        assert_eq!(node.packets[0].observer, node.address);
    }

    #[test]
    fn test_announcement_wins_over_hello_hint() {
        let log = "\
10:00:01.000000 > Packet send Type: 00000100 Size: 10 Src: 0x0C Dst: 0xFFFF Id: 1
10:00:02.000000 > Local LoRa address (from WiFi MAC): 00D1
10:00:03.000000 > Local LoRa address (from WiFi MAC): 00D2
";
        let node = ingest_str(log);
        assert_eq!(node.address.as_ref().unwrap().as_str(), "0xd1");
    }

    #[test]
    fn test_missing_address_is_not_an_error() {
        let node = ingest_str(
            "10:00:01.000000 > Packet received Type: 00000010 Size: 20 Src: 0x0A Dst: 0x0B Id: 1\n",
        );
        assert!(node.address.is_none());
        assert_eq!(node.packets[0].observer, None);
        assert!(node.diagnostics.is_empty());
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut bytes =
            b"10:00:01.000000 > Packet send Type: 00000010 Size: 20 Src: 0x0A Dst: 0x0B Id: 1\n".to_vec();
        bytes.extend_from_slice(b"\xff\xfe > Packet send Type: 00000010\n");
        bytes.extend_from_slice(b"10:00:02.000000 > E: Boom\r\n");

        let node = ingest_reader(
            Cursor::new(bytes),
            "node",
            Path::new("node"),
            &AnalyzerConfig::default(),
        );
        assert_eq!(node.packets.len(), 1);
        assert_eq!(node.errors.len(), 1);
        assert!(node.diagnostics.is_empty());
    }

    #[test]
    fn test_unusable_queue_and_error_lines_are_diagnosed() {
        let log = "\
10:00:01.000000 > Size of Send Packets Queue: 2
 > Size of Send Packets Queue: 5
10:00:02.000000 > Size of Send Packets Queue: many
 > E: Radio busy
10:00:03.000000 > E: Send failed
10:00:04.000000 > Size of Send Packets Queue: 1
";
        let node = ingest_str(log);

        assert_eq!(node.errors.len(), 1);
        assert_eq!(node.queue_samples.len(), 2);
        assert_eq!(node.queue_samples[1].queue_length, 1);
        let orders: Vec<u64> = node.queue_samples.iter().map(|q| q.order).collect();
        assert_eq!(orders, vec![0, 1]);

        let reasons: Vec<(usize, ParseFailure)> = node
            .diagnostics
            .iter()
            .map(|d| (d.line, d.reason.clone()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (2, ParseFailure::MissingTimestamp),
                (3, ParseFailure::MissingQueueLength),
                (4, ParseFailure::MissingTimestamp),
            ]
        );
    }

    #[test]
    fn test_read_error_ends_ingestion() {
        struct FailingReader;

        impl std::io::Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("device gone"))
            }
        }

        let node = ingest_reader(
            BufReader::new(FailingReader),
            "node",
            Path::new("node"),
            &AnalyzerConfig::default(),
        );
        assert!(node.packets.is_empty());
        assert!(node.diagnostics.is_empty());
    }

    #[test]
    fn test_directory_path_is_unreadable() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ingest_file(dir.path(), &AnalyzerConfig::default()).is_err());

        let paths = vec![dir.path().to_path_buf()];
        let trace = ingest_all(&paths, &AnalyzerConfig::default());
        assert_eq!(trace.node_count(), 0);
        assert_eq!(trace.unreadable, paths);
    }

    #[test]
    fn test_ingest_all_records_unreadable_files() {
        let paths = vec![PathBuf::from("/nonexistent/monitor_COM9.txt")];
        let trace = ingest_all(&paths, &AnalyzerConfig::default());
        assert_eq!(trace.node_count(), 0);
        assert_eq!(trace.unreadable, paths);
    }
}
